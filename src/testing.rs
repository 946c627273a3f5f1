//! Mock capabilities and fixtures for unit tests.
//!
//! Nothing here touches the real screen, input devices or processes.

use anyhow::{anyhow, Result};
use image::{imageops, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::automation::{AutomationConfig, AutomationEngine, CancelToken, HostCallbacks};
use crate::diagnostics::Diagnostics;
use crate::platform::{
    Capabilities, InputControl, Key, ProcessControl, Region, ScreenCapture, TextRecognition,
    WindowDetect,
};
use crate::queue::{Job, JobQueueController};
use crate::vision::{ScreenMatcher, Template, TemplateStore, DEFAULT_VERSION};

/// Deterministic RGB noise; distinct seeds give uncorrelated images.
pub fn noise_image(width: u32, height: u32, seed: u64) -> RgbaImage {
    let mut state = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(0xD1B5_4A32_D192_ED03);
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 33) as u8
    };
    RgbaImage::from_fn(width, height, |_, _| Rgba([next(), next(), next(), 255]))
}

pub fn crop(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// An in-memory template that is not backed by a library.
pub fn template_from(image: RgbaImage, name: &str) -> Template {
    let (width, height) = image.dimensions();
    Template {
        name: name.to_string(),
        category: "buttons".to_string(),
        version: DEFAULT_VERSION.to_string(),
        path: PathBuf::from(format!("{}.png", name)),
        width,
        height,
        description: String::new(),
        created_at: None,
        image: Arc::new(image),
    }
}

struct ScreenScript {
    current: RgbaImage,
    next: Option<(usize, RgbaImage)>,
    captures: usize,
    regions: Vec<Option<Region>>,
}

/// A screen showing a fixed image, optionally replaced after some captures.
pub struct ScriptedScreen {
    script: Mutex<ScreenScript>,
}

impl ScriptedScreen {
    pub fn new(image: RgbaImage) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(ScreenScript {
                current: image,
                next: None,
                captures: 0,
                regions: Vec::new(),
            }),
        })
    }

    /// Shows `image` from the capture after the first `captures`.
    pub fn show_after(&self, captures: usize, image: RgbaImage) {
        self.script.lock().unwrap().next = Some((captures, image));
    }

    pub fn captured_regions(&self) -> Vec<Option<Region>> {
        self.script.lock().unwrap().regions.clone()
    }

    /// Capture and matching only.
    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        let mut caps = Capabilities::none();
        caps.capture = Some(Arc::clone(self) as Arc<dyn ScreenCapture>);
        caps
    }

    pub fn matcher(self: &Arc<Self>) -> ScreenMatcher {
        self.matcher_with(Arc::new(Diagnostics::new()))
    }

    pub fn matcher_with(self: &Arc<Self>, diagnostics: Arc<Diagnostics>) -> ScreenMatcher {
        ScreenMatcher::new(&self.capabilities(), diagnostics, 0.8)
    }

    pub fn matcher_with_input(self: &Arc<Self>, input: Arc<RecordingInput>) -> ScreenMatcher {
        let mut caps = self.capabilities();
        caps.input = Some(input);
        ScreenMatcher::new(&caps, Arc::new(Diagnostics::new()), 0.8)
    }
}

impl ScreenCapture for ScriptedScreen {
    fn capture(&self, region: Option<Region>) -> Result<RgbaImage> {
        let mut script = self.script.lock().unwrap();
        if script.next.as_ref().is_some_and(|(after, _)| script.captures >= *after) {
            if let Some((_, image)) = script.next.take() {
                script.current = image;
            }
        }
        script.captures += 1;
        script.regions.push(region);

        let Some(r) = region else {
            return Ok(script.current.clone());
        };
        let (w, h) = script.current.dimensions();
        let x = r.x.max(0) as u32;
        let y = r.y.max(0) as u32;
        if x >= w || y >= h {
            return Err(anyhow!("Region outside the screen"));
        }
        Ok(crop(&script.current, x, y, r.width.min(w - x), r.height.min(h - y)))
    }
}

/// Records every input call instead of performing it.
#[derive(Default)]
pub struct RecordingInput {
    clicks: Mutex<Vec<(i32, i32)>>,
    keys: Mutex<Vec<Vec<Key>>>,
    clipboard: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingInput {
    /// Input whose clicks always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<Vec<Key>> {
        self.keys.lock().unwrap().clone()
    }

    pub fn clipboard(&self) -> Vec<String> {
        self.clipboard.lock().unwrap().clone()
    }
}

impl InputControl for RecordingInput {
    fn click(&self, x: i32, y: i32) -> Result<()> {
        if self.fail {
            return Err(anyhow!("click rejected"));
        }
        self.clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    fn press_keys(&self, keys: &[Key]) -> Result<()> {
        self.keys.lock().unwrap().push(keys.to_vec());
        Ok(())
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        self.clipboard.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Returns the given texts in order, then keeps repeating the last one.
pub struct ScriptedText {
    texts: Mutex<VecDeque<String>>,
    languages: Mutex<Vec<String>>,
}

impl ScriptedText {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            languages: Mutex::new(Vec::new()),
        }
    }

    /// Language requested by each recognition call.
    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

impl TextRecognition for ScriptedText {
    fn recognize(&self, _image: &RgbaImage, language: &str) -> Result<String> {
        self.languages.lock().unwrap().push(language.to_string());
        let mut texts = self.texts.lock().unwrap();
        if texts.len() > 1 {
            return Ok(texts.pop_front().unwrap_or_default());
        }
        texts
            .front()
            .cloned()
            .ok_or_else(|| anyhow!("no text scripted"))
    }
}

#[derive(Default)]
struct ProcessScript {
    running: bool,
    launches: Vec<String>,
    opened: Vec<PathBuf>,
    terminations: usize,
    failures: Vec<(String, usize)>,
    panics: Vec<(String, usize)>,
}

/// A fake process table holding at most one application instance.
///
/// Launch arguments are joined with spaces and recorded; scripted failures
/// match on a fragment of that string.
#[derive(Default)]
pub struct ScriptedProcesses {
    script: Mutex<ProcessScript>,
}

impl ScriptedProcesses {
    pub fn set_running(&self, running: bool) {
        self.script.lock().unwrap().running = running;
    }

    pub fn running(&self) -> bool {
        self.script.lock().unwrap().running
    }

    /// Fails the next `times` launches whose arguments contain `fragment`.
    pub fn fail_launches(&self, fragment: &str, times: usize) {
        self.script
            .lock()
            .unwrap()
            .failures
            .push((fragment.to_string(), times));
    }

    /// Panics on the next `times` launches whose arguments contain `fragment`.
    pub fn panic_on_launch(&self, fragment: &str, times: usize) {
        self.script
            .lock()
            .unwrap()
            .panics
            .push((fragment.to_string(), times));
    }

    pub fn launches(&self) -> Vec<String> {
        self.script.lock().unwrap().launches.clone()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.script.lock().unwrap().opened.clone()
    }

    pub fn terminations(&self) -> usize {
        self.script.lock().unwrap().terminations
    }
}

impl ProcessControl for ScriptedProcesses {
    fn is_running(&self, _name: &str) -> bool {
        self.running()
    }

    fn terminate(&self, _name: &str) -> usize {
        let mut script = self.script.lock().unwrap();
        script.terminations += 1;
        let killed = usize::from(script.running);
        script.running = false;
        killed
    }

    fn launch(&self, _exe: &Path, args: &[OsString]) -> Result<()> {
        let joined = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        // Decide under the lock, panic outside it
        let should_panic = {
            let mut script = self.script.lock().unwrap();
            script.launches.push(joined.clone());
            if let Some((_, left)) = script
                .panics
                .iter_mut()
                .find(|(f, left)| *left > 0 && joined.contains(f.as_str()))
            {
                *left -= 1;
                true
            } else {
                if let Some((_, left)) = script
                    .failures
                    .iter_mut()
                    .find(|(f, left)| *left > 0 && joined.contains(f.as_str()))
                {
                    *left -= 1;
                    return Err(anyhow!("launch failed: {}", joined));
                }
                script.running = true;
                false
            }
        };
        if should_panic {
            panic!("launch crashed: {}", joined);
        }
        Ok(())
    }

    fn open_default(&self, path: &Path) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.opened.push(path.to_path_buf());
        script.running = true;
        Ok(())
    }
}

/// Shows a CapCut window exactly while the scripted application runs.
pub struct ScriptedWindows {
    processes: Arc<ScriptedProcesses>,
}

impl ScriptedWindows {
    pub fn new(processes: Arc<ScriptedProcesses>) -> Self {
        Self { processes }
    }
}

impl WindowDetect for ScriptedWindows {
    fn window_titles(&self) -> Result<Vec<String>> {
        let mut titles = vec!["Program Manager".to_string()];
        if self.processes.running() {
            titles.push("CapCut".to_string());
        }
        Ok(titles)
    }
}

/// A fixed set of window titles.
pub struct TitleWindows {
    titles: Vec<String>,
}

impl TitleWindows {
    pub fn new(titles: &[&str]) -> Self {
        Self {
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl WindowDetect for TitleWindows {
    fn window_titles(&self) -> Result<Vec<String>> {
        Ok(self.titles.clone())
    }
}

/// Defaults scaled down to milliseconds so tests run quickly.
pub fn fast_config(exe: &Path) -> AutomationConfig {
    let mut config = AutomationConfig::default();
    config.app.exe_path = exe.to_path_buf();
    config.retry.attempts = 3;
    config.retry.delay_ms = 1;
    config.retry.ui_open_attempts = 0;

    let timing = &mut config.timing;
    timing.app_open_timeout_ms = 500;
    timing.project_load_timeout_ms = 200;
    timing.export_timeout_ms = 2_000;
    timing.window_poll_ms = 5;
    timing.window_grace_ms = 5;
    timing.relaunch_wait_ms = 1;
    timing.project_load_grace_ms = 1;
    timing.click_timeout_ms = 50;
    timing.click_settle_ms = 1;
    timing.export_poll_ms = 5;
    timing.export_fallback_wait_ms = 5;
    timing.progress_log_interval_ms = 1_000;
    timing.ui_open_grace_ms = 1;
    timing.key_delay_ms = 0;
    config
}

/// A scratch directory with an application executable, a template library
/// and scripted processes, from which engines and controllers are built.
pub struct EngineHarness {
    pub dir: TempDir,
    pub config: AutomationConfig,
    pub processes: Arc<ScriptedProcesses>,
    pub templates: Arc<TemplateStore>,
    pub diagnostics: Arc<Diagnostics>,
    pub callbacks: HostCallbacks,
}

impl EngineHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("CapCut.exe");
        fs::write(&exe, b"").unwrap();
        let templates = Arc::new(TemplateStore::new(dir.path().join("templates")).unwrap());
        let diagnostics =
            Arc::new(Diagnostics::new().with_screenshot_dir(dir.path().join("screenshots")));

        Self {
            config: fast_config(&exe),
            dir,
            processes: Arc::new(ScriptedProcesses::default()),
            templates,
            diagnostics,
            callbacks: HostCallbacks::default(),
        }
    }

    /// Scripted processes and windows, no screen and no input.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::none();
        caps.process = Some(self.processes.clone());
        caps.windows = Some(Arc::new(ScriptedWindows::new(self.processes.clone())));
        caps
    }

    pub fn capabilities_with_input(&self) -> Capabilities {
        let mut caps = self.capabilities();
        caps.input = Some(Arc::new(RecordingInput::default()));
        caps
    }

    pub fn engine(&self) -> AutomationEngine {
        self.engine_with(self.capabilities())
    }

    pub fn engine_with(&self, caps: Capabilities) -> AutomationEngine {
        AutomationEngine::new(
            self.config.clone(),
            caps,
            Some(self.templates.clone()),
            self.diagnostics.clone(),
            self.callbacks.clone(),
            CancelToken::new(),
        )
    }

    pub fn controller(&self) -> JobQueueController {
        JobQueueController::new(
            self.config.clone(),
            self.capabilities_with_input(),
            Some(self.templates.clone()),
            self.diagnostics.clone(),
            self.callbacks.clone(),
        )
    }

    /// Creates a project folder named `name`, with a primary data file if asked.
    pub fn project(&self, name: &str, with_primary_file: bool) -> Job {
        let path = self.dir.path().join("projects").join(name);
        fs::create_dir_all(&path).unwrap();
        if with_primary_file {
            fs::write(path.join("draft_content.json"), "{}").unwrap();
        }
        Job::new(name, name, path)
    }

    pub fn add_template(&self, name: &str, category: &str, image: &RgbaImage) {
        let source = self.dir.path().join(format!("source_{}_{}.png", category, name));
        image.save(&source).unwrap();
        assert!(self
            .templates
            .add(&source, name, category, DEFAULT_VERSION, ""));
    }
}
