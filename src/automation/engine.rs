//! Per-job export automation.
//!
//! One attempt runs: open project → wait for it to load → trigger export →
//! wait for completion → close the application. `export_job` repeats the
//! attempt a bounded number of times. No step failure is fatal to the
//! engine; only cancellation ends a job early.

use anyhow::{anyhow, Result};
use regex::{Regex, RegexBuilder};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::callbacks::HostCallbacks;
use super::config::{ms, AutomationConfig};
use super::state::{AutomationState, CancelToken};
use super::strategy::{
    default_completion_strategies, default_export_strategies, default_open_strategies,
    run_first_available, run_in_order, CompletionStrategy, ExportStrategy, OpenProjectStrategy,
    PROJECT_LOADED,
};
use crate::diagnostics::{panic_message, Diagnostics, Severity};
use crate::platform::{parse_hotkey, Capabilities};
use crate::queue::{Job, JobOutcome};
use crate::vision::{ScreenMatcher, Template, TemplateStore};

pub struct AutomationEngine {
    config: AutomationConfig,
    caps: Capabilities,
    screen: ScreenMatcher,
    templates: Option<Arc<TemplateStore>>,
    diagnostics: Arc<Diagnostics>,
    callbacks: HostCallbacks,
    cancel: CancelToken,
    state: Mutex<AutomationState>,
    title_patterns: Vec<Regex>,
    open_strategies: Vec<Box<dyn OpenProjectStrategy>>,
    export_strategies: Vec<Box<dyn ExportStrategy>>,
    completion_strategies: Vec<Box<dyn CompletionStrategy>>,
}

impl AutomationEngine {
    pub fn new(
        config: AutomationConfig,
        caps: Capabilities,
        templates: Option<Arc<TemplateStore>>,
        diagnostics: Arc<Diagnostics>,
        callbacks: HostCallbacks,
        cancel: CancelToken,
    ) -> Self {
        let screen = ScreenMatcher::new(
            &caps,
            Arc::clone(&diagnostics),
            config.vision.confidence_threshold,
        );
        let title_patterns = compile_title_patterns(&config.app.window_titles);

        Self {
            config,
            caps,
            screen,
            templates,
            diagnostics,
            callbacks,
            cancel,
            state: Mutex::new(AutomationState::Pending),
            title_patterns,
            open_strategies: default_open_strategies(),
            export_strategies: default_export_strategies(),
            completion_strategies: default_completion_strategies(),
        }
    }

    /// Replaces the project-opening strategies.
    pub fn with_open_strategies(mut self, strategies: Vec<Box<dyn OpenProjectStrategy>>) -> Self {
        self.open_strategies = strategies;
        self
    }

    pub fn with_export_strategies(mut self, strategies: Vec<Box<dyn ExportStrategy>>) -> Self {
        self.export_strategies = strategies;
        self
    }

    pub fn with_completion_strategies(
        mut self,
        strategies: Vec<Box<dyn CompletionStrategy>>,
    ) -> Self {
        self.completion_strategies = strategies;
        self
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn screen(&self) -> &ScreenMatcher {
        &self.screen
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn state(&self) -> AutomationState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(AutomationState::Failed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True when templates can be located on screen.
    pub fn vision_available(&self) -> bool {
        self.config.vision.enabled && self.screen.is_available() && self.templates.is_some()
    }

    /// Looks up `(name, category)` at the configured template version.
    pub fn template(&self, (name, category): (&str, &str)) -> Option<Template> {
        self.templates
            .as_ref()?
            .get(name, category, &self.config.vision.template_version)
    }

    /// Stops the current job as soon as possible.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.set_state(AutomationState::Cancelled, "Automation cancelled");
    }

    /// Clears cancellation and returns to Pending.
    pub fn reset(&self) {
        self.cancel.reset();
        if let Ok(mut state) = self.state.lock() {
            *state = AutomationState::Pending;
        }
    }

    /// Sleeps unless cancelled; `false` means cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.cancel.sleep(duration)
    }

    fn set_state(&self, next: AutomationState, message: &str) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if *state == AutomationState::Cancelled && next != AutomationState::Cancelled {
                return;
            }
            *state = next;
        }
        self.diagnostics.log(message);
        self.callbacks.status(next, message);
    }

    /// Sends a hotkey such as `"ctrl+e"`.
    pub fn press_hotkey(&self, hotkey: &str) -> Result<()> {
        let input = self
            .caps
            .input
            .as_ref()
            .ok_or_else(|| anyhow!("Input control is not available"))?;
        let keys = parse_hotkey(hotkey)?;
        input.press_keys(&keys)
    }

    /// Terminates a running instance and waits before it may be relaunched.
    ///
    /// Returns `false` only if cancelled while waiting.
    pub(crate) fn stop_running_instance(&self) -> bool {
        let Some(process) = &self.caps.process else {
            return true;
        };
        let name = &self.config.app.process_name;
        if !process.is_running(name) {
            return true;
        }
        self.diagnostics
            .log("Application already running, restarting it");
        process.terminate(name);
        self.sleep(ms(self.config.timing.relaunch_wait_ms))
    }

    /// Launches the application, optionally with a file or folder argument,
    /// and waits for its window.
    pub fn open_app(&self, payload: Option<&Path>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.set_state(AutomationState::OpeningApp, "Opening application");

        let exe = &self.config.app.exe_path;
        if !exe.is_file() {
            self.diagnostics.record(
                Severity::Error,
                "open_app",
                &format!("Application not found: {}", exe.display()),
                None,
            );
            return false;
        }
        let Some(process) = &self.caps.process else {
            self.diagnostics
                .record(Severity::Error, "open_app", "Process control is not available", None);
            return false;
        };

        if !self.stop_running_instance() {
            return false;
        }

        let args: Vec<_> = payload.map(|p| p.as_os_str().to_owned()).into_iter().collect();
        if let Err(e) = process.launch(exe, &args) {
            self.diagnostics
                .record(Severity::Error, "open_app", &format!("{:#}", e), None);
            return false;
        }

        self.wait_for_window(ms(self.config.timing.app_open_timeout_ms))
    }

    /// Polls visible window titles until one matches the configured patterns.
    ///
    /// Without window detection a fixed grace period counts as success.
    pub fn wait_for_window(&self, timeout: Duration) -> bool {
        let Some(windows) = &self.caps.windows else {
            let grace = ms(self.config.timing.window_grace_ms);
            self.diagnostics.log(&format!(
                "Window detection unavailable, waiting {:.1}s",
                grace.as_secs_f32()
            ));
            return self.sleep(grace);
        };

        let poll = ms(self.config.timing.window_poll_ms);
        let start = Instant::now();
        loop {
            if self.is_cancelled() {
                return false;
            }
            match windows.window_titles() {
                Ok(titles) => {
                    if let Some(title) = titles.iter().find(|t| self.title_matches(t)) {
                        self.diagnostics
                            .log(&format!("Application window detected: {}", title));
                        return true;
                    }
                }
                Err(e) => tracing::debug!("Window enumeration failed: {:#}", e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                self.diagnostics.record(
                    Severity::Warning,
                    "open_app",
                    &format!(
                        "Application window did not appear within {:.0}s",
                        timeout.as_secs_f32()
                    ),
                    None,
                );
                return false;
            }
            if !self.sleep(poll.min(timeout - elapsed)) {
                return false;
            }
        }
    }

    fn title_matches(&self, title: &str) -> bool {
        self.title_patterns.iter().any(|p| p.is_match(title))
    }

    /// Opens `job`'s project, trying each open strategy in turn.
    pub fn open_project(&self, job: &Job) -> bool {
        self.diagnostics
            .log(&format!("Opening project: {}", job.name));
        run_in_order(self, "open_project", &self.open_strategies, |s| {
            s.open(self, job)
        })
    }

    /// Waits for the opened project to become usable.
    ///
    /// Watches for a `project_loaded` template when one exists, otherwise
    /// waits a fixed grace period.
    pub fn wait_for_project_load(&self) -> bool {
        self.set_state(AutomationState::LoadingProject, "Loading project");

        let timing = &self.config.timing;
        if self.vision_available() {
            if let Some(template) = self.template(PROJECT_LOADED) {
                let result = self.screen.wait_for(
                    &template,
                    ms(timing.project_load_timeout_ms),
                    ms(timing.window_poll_ms),
                    None,
                    &self.cancel,
                );
                return result.found;
            }
        }
        self.sleep(ms(timing.project_load_grace_ms))
    }

    /// Triggers the export, by vision click or keyboard shortcut.
    pub fn click_export(&self) -> bool {
        self.set_state(AutomationState::Exporting, "Starting export");
        run_in_order(self, "click_export", &self.export_strategies, |s| {
            s.export(self)
        })
    }

    /// Waits until the export finishes or `timeout` passes.
    pub fn wait_for_export_complete(&self, timeout: Duration) -> bool {
        self.diagnostics.log("Waiting for export to complete");
        run_first_available(
            self,
            "wait_for_export_complete",
            &self.completion_strategies,
            |s| s.wait(self, timeout),
        )
    }

    /// Terminates every instance of the application.
    pub fn close_app(&self) -> bool {
        let Some(process) = &self.caps.process else {
            return false;
        };
        let closed = process.terminate(&self.config.app.process_name);
        if closed > 0 {
            self.diagnostics
                .log(&format!("Closed {} application instance(s)", closed));
        }
        true
    }

    /// Exports one job, retrying up to `retry_count` attempts.
    ///
    /// The application is closed after every attempt, successful or not. A
    /// panic inside an attempt fails that attempt only.
    pub fn export_job(&self, job: &Job, retry_count: u32) -> JobOutcome {
        let attempts = retry_count.max(1);

        for attempt in 1..=attempts {
            if self.is_cancelled() {
                self.set_state(AutomationState::Cancelled, "Automation cancelled");
                return JobOutcome::Cancelled;
            }

            self.set_state(AutomationState::Pending, &format!("Queued: {}", job.name));
            if attempt > 1 {
                self.diagnostics.log(&format!(
                    "Retrying {} (attempt {}/{})",
                    job.name, attempt, attempts
                ));
                if !self.sleep(ms(self.config.retry.delay_ms)) {
                    return JobOutcome::Cancelled;
                }
            }
            self.set_state(
                AutomationState::Starting,
                &format!("Starting export: {}", job.name),
            );

            let succeeded = match panic::catch_unwind(AssertUnwindSafe(|| self.run_attempt(job))) {
                Ok(Ok(done)) => done,
                Ok(Err(e)) => {
                    self.diagnostics.record(
                        Severity::Error,
                        "export_job",
                        &format!("{}: {:#}", job.name, e),
                        None,
                    );
                    false
                }
                Err(payload) => {
                    self.diagnostics.record(
                        Severity::Critical,
                        "export_job",
                        &format!(
                            "{} panicked on attempt {}/{}: {}",
                            job.name,
                            attempt,
                            attempts,
                            panic_message(payload.as_ref())
                        ),
                        None,
                    );
                    false
                }
            };
            self.close_app();

            if self.is_cancelled() {
                self.set_state(AutomationState::Cancelled, "Automation cancelled");
                return JobOutcome::Cancelled;
            }
            if succeeded {
                self.set_state(
                    AutomationState::Completed,
                    &format!("Export completed: {}", job.name),
                );
                return JobOutcome::Completed;
            }
            self.diagnostics.log(&format!(
                "Attempt {}/{} failed for {}",
                attempt, attempts, job.name
            ));
        }

        let reason = format!("Export failed after {} attempts", attempts);
        self.set_state(
            AutomationState::Failed,
            &format!("{}: {}", job.name, reason),
        );
        JobOutcome::Failed(reason)
    }

    fn run_attempt(&self, job: &Job) -> Result<bool> {
        if !job.path.exists() {
            return Err(anyhow!("Project folder not found: {}", job.path.display()));
        }

        if !self.open_project(job) {
            self.diagnostics.log("Failed to open project");
            return Ok(false);
        }
        if !self.wait_for_project_load() {
            self.diagnostics.log("Project did not finish loading");
            return Ok(false);
        }
        if !self.click_export() {
            self.diagnostics.log("Failed to start export");
            return Ok(false);
        }
        if !self.wait_for_export_complete(ms(self.config.timing.export_timeout_ms)) {
            self.diagnostics.log("Export did not complete");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Compiles window-title patterns case-insensitively; an invalid pattern
/// is matched literally instead.
fn compile_title_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .or_else(|e| {
                    tracing::warn!("Invalid window title pattern '{}': {}", p, e);
                    RegexBuilder::new(&regex::escape(p))
                        .case_insensitive(true)
                        .build()
                })
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::strategy::CommandLineOpen;
    use crate::platform::Key;
    use crate::platform::Region;
    use crate::testing::{
        crop, noise_image, EngineHarness, RecordingInput, ScriptedScreen, ScriptedText,
        TitleWindows,
    };
    use image::imageops;

    #[test]
    fn test_title_patterns_match_substrings_case_insensitively() {
        let patterns = compile_title_patterns(&[
            "CapCut".to_string(),
            "剪映".to_string(),
            "[unclosed".to_string(),
        ]);
        assert_eq!(patterns.len(), 3);
        assert!(patterns[0].is_match("capcut - Holiday Reel"));
        assert!(patterns[1].is_match("剪映专业版"));
        assert!(patterns[2].is_match("x [unclosed y"));
    }

    #[test]
    fn test_open_app_restarts_running_instance() {
        let harness = EngineHarness::new();
        harness.processes.set_running(true);

        assert!(harness.engine().open_app(None));
        assert_eq!(harness.processes.terminations(), 1);
        assert_eq!(harness.processes.launches().len(), 1);
    }

    #[test]
    fn test_open_app_requires_executable() {
        let mut harness = EngineHarness::new();
        harness.config.app.exe_path = harness.dir.path().join("missing.exe");

        assert!(!harness.engine().open_app(None));
        assert!(harness.processes.launches().is_empty());
    }

    #[test]
    fn test_wait_for_window_times_out() {
        let harness = EngineHarness::new();
        let windows = Arc::new(TitleWindows::new(&["Notepad"]));
        let mut caps = harness.capabilities();
        caps.windows = Some(windows);
        let engine = harness.engine_with(caps);

        let start = Instant::now();
        assert!(!engine.wait_for_window(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_wait_for_window_without_detection_uses_grace() {
        let harness = EngineHarness::new();
        let mut caps = harness.capabilities();
        caps.windows = None;
        let engine = harness.engine_with(caps);

        assert!(engine.wait_for_window(Duration::from_secs(30)));
    }

    #[test]
    fn test_open_project_prefers_primary_file_then_folder() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", true);
        harness.processes.fail_launches("draft_content.json", 1);

        assert!(harness.engine().open_project(&job));
        let launches = harness.processes.launches();
        assert_eq!(launches.len(), 2);
        assert!(launches[0].ends_with("draft_content.json"));
        assert_eq!(launches[1], job.path.to_string_lossy());
    }

    #[test]
    fn test_open_project_falls_back_to_default_handler() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", true);
        harness.processes.fail_launches("my_reel", 10);

        assert!(harness.engine().open_project(&job));
        assert_eq!(harness.processes.opened(), vec![job.path.join("draft_content.json")]);
    }

    #[test]
    fn test_open_project_ui_fallback_pastes_path() {
        let mut harness = EngineHarness::new();
        harness.config.retry.ui_open_attempts = 2;
        let input = Arc::new(RecordingInput::default());
        let mut caps = harness.capabilities();
        caps.input = Some(input.clone());
        let job = harness.project("my_reel", false);
        harness.processes.fail_launches("my_reel", 10);

        assert!(harness.engine_with(caps).open_project(&job));
        assert_eq!(input.clipboard(), vec![job.path.to_string_lossy().to_string()]);
        assert_eq!(
            input.keys(),
            vec![
                vec![Key::Control, Key::Char('o')],
                vec![Key::Control, Key::Char('v')],
                vec![Key::Enter],
            ]
        );
    }

    #[test]
    fn test_click_export_falls_back_to_hotkey_without_vision() {
        let harness = EngineHarness::new();
        let input = Arc::new(RecordingInput::default());
        let mut caps = harness.capabilities();
        caps.input = Some(input.clone());

        let engine = harness.engine_with(caps);
        assert!(!engine.vision_available());
        assert!(engine.click_export());
        assert_eq!(input.keys(), vec![vec![Key::Control, Key::Char('e')]]);
        assert_eq!(engine.state(), AutomationState::Exporting);
    }

    #[test]
    fn test_click_export_uses_vision_then_hotkey_on_exhaustion() {
        let mut harness = EngineHarness::new();
        harness.config.retry.attempts = 2;
        harness.config.timing.click_timeout_ms = 20;
        let screen_image = noise_image(240, 160, 61);
        let button = crop(&screen_image, 150, 100, 40, 20);
        harness.add_template("export_button", "buttons", &button);

        // Button visible: clicked by vision
        let screen = ScriptedScreen::new(screen_image);
        let input = Arc::new(RecordingInput::default());
        let mut caps = screen.capabilities();
        caps.input = Some(input.clone());
        caps.process = Some(harness.processes.clone());
        let engine = harness.engine_with(caps);
        assert!(engine.vision_available());
        assert!(engine.click_export());
        assert_eq!(input.clicks(), vec![(170, 110)]);
        assert!(input.keys().is_empty());

        // Button absent: clicks exhausted, shortcut sent instead
        let screen = ScriptedScreen::new(noise_image(240, 160, 62));
        let input = Arc::new(RecordingInput::default());
        let mut caps = screen.capabilities();
        caps.input = Some(input.clone());
        let engine = harness.engine_with(caps);
        assert!(engine.click_export());
        assert!(input.clicks().is_empty());
        assert_eq!(input.keys(), vec![vec![Key::Control, Key::Char('e')]]);
    }

    #[test]
    fn test_export_complete_detected_by_vision() {
        let harness = EngineHarness::new();
        let done = noise_image(200, 120, 70);
        let badge = crop(&done, 20, 30, 30, 15);
        harness.add_template("export_complete", "status", &badge);

        let screen = ScriptedScreen::new(noise_image(200, 120, 71));
        screen.show_after(2, done);
        let mut caps = screen.capabilities();
        caps.input = Some(Arc::new(RecordingInput::default()));
        let engine = harness.engine_with(caps);

        assert!(engine.wait_for_export_complete(Duration::from_secs(5)));
    }

    #[test]
    fn test_export_complete_vision_timeout_saves_screenshot() {
        let harness = EngineHarness::new();
        harness.add_template("export_complete", "status", &noise_image(30, 15, 80));

        let screen = ScriptedScreen::new(noise_image(200, 120, 81));
        let mut caps = screen.capabilities();
        caps.input = Some(Arc::new(RecordingInput::default()));
        let engine = harness.engine_with(caps);

        assert!(!engine.wait_for_export_complete(Duration::from_millis(40)));
        let shots: Vec<String> = std::fs::read_dir(harness.dir.path().join("screenshots"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(shots.iter().any(|n| n.starts_with("export_timeout_")));
    }

    #[test]
    fn test_export_complete_detected_by_text() {
        let mut harness = EngineHarness::new();
        harness.config.vision.completion_text = Some("Export complete".to_string());
        harness.config.vision.completion_text_region = Some(Region::new(10, 10, 80, 20));
        harness.config.vision.ocr_language = "chi_sim".to_string();

        let screen = ScriptedScreen::new(noise_image(200, 120, 72));
        let text = Arc::new(ScriptedText::new(&[
            "Exporting 40%",
            "Exporting 90%",
            "Export complete!",
        ]));
        let mut caps = screen.capabilities();
        caps.input = Some(Arc::new(RecordingInput::default()));
        caps.text = Some(text.clone());
        let engine = harness.engine_with(caps);

        assert!(engine.wait_for_export_complete(Duration::from_secs(5)));
        let languages = text.languages();
        assert_eq!(languages.len(), 3);
        assert!(languages.iter().all(|l| l == "chi_sim"));
        assert!(screen
            .captured_regions()
            .iter()
            .all(|r| *r == Some(Region::new(10, 10, 80, 20))));
    }

    #[test]
    fn test_export_complete_text_timeout_records_error() {
        let mut harness = EngineHarness::new();
        harness.config.vision.completion_text = Some("Export complete".to_string());
        harness.config.vision.completion_text_region = Some(Region::new(0, 0, 50, 20));

        let screen = ScriptedScreen::new(noise_image(100, 60, 73));
        let mut caps = screen.capabilities();
        caps.text = Some(Arc::new(ScriptedText::new(&["Exporting"])));
        let engine = harness.engine_with(caps);

        assert!(!engine.wait_for_export_complete(Duration::from_millis(40)));
        assert!(harness
            .diagnostics
            .records()
            .iter()
            .any(|r| r.severity == Severity::Error && r.operation == "wait_for_export_complete"));
    }

    #[test]
    fn test_fixed_completion_wait() {
        let mut harness = EngineHarness::new();
        harness.config.timing.export_fallback_wait_ms = 20;
        let engine = harness.engine();
        assert!(engine.wait_for_export_complete(Duration::from_secs(5)));

        // The blind wait never succeeds when the timeout is shorter
        harness.config.timing.export_fallback_wait_ms = 500;
        let engine = harness.engine();
        assert!(!engine.wait_for_export_complete(Duration::from_millis(20)));
    }

    #[test]
    fn test_project_load_waits_for_template_when_present() {
        let mut harness = EngineHarness::new();
        harness.config.timing.project_load_timeout_ms = 40;
        harness.add_template("project_loaded", "status", &noise_image(30, 15, 90));

        let screen = ScriptedScreen::new(noise_image(200, 120, 91));
        let mut caps = screen.capabilities();
        caps.input = Some(Arc::new(RecordingInput::default()));
        let engine = harness.engine_with(caps);

        assert!(!engine.wait_for_project_load());
        assert_eq!(engine.state(), AutomationState::LoadingProject);
    }

    #[test]
    fn test_export_job_succeeds_on_last_attempt() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", false);
        harness.processes.fail_launches("my_reel", 2);
        let engine = harness
            .engine_with(harness.capabilities_with_input())
            .with_open_strategies(vec![Box::new(CommandLineOpen)]);

        assert_eq!(engine.export_job(&job, 3), JobOutcome::Completed);
        assert_eq!(harness.processes.launches().len(), 3);
        assert_eq!(harness.processes.terminations(), 3);
        assert_eq!(engine.state(), AutomationState::Completed);
    }

    #[test]
    fn test_export_job_retries_after_panicking_attempt() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", false);
        harness.processes.panic_on_launch("my_reel", 1);
        let engine = harness
            .engine_with(harness.capabilities_with_input())
            .with_open_strategies(vec![Box::new(CommandLineOpen)]);

        assert_eq!(engine.export_job(&job, 3), JobOutcome::Completed);
        assert_eq!(harness.processes.launches().len(), 2);
        assert_eq!(harness.processes.terminations(), 2);
        let records = harness.diagnostics.records();
        assert!(records
            .iter()
            .any(|r| r.severity == Severity::Critical && r.message.contains("attempt 1/3")));
    }

    #[test]
    fn test_export_job_exhausts_retries() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", false);
        harness.processes.fail_launches("my_reel", 10);
        let engine = harness
            .engine_with(harness.capabilities_with_input())
            .with_open_strategies(vec![Box::new(CommandLineOpen)]);

        let outcome = engine.export_job(&job, 2);
        assert_eq!(
            outcome,
            JobOutcome::Failed("Export failed after 2 attempts".to_string())
        );
        assert_eq!(harness.processes.launches().len(), 2);
        assert_eq!(harness.processes.terminations(), 2);
        assert_eq!(engine.state(), AutomationState::Failed);
    }

    #[test]
    fn test_export_job_missing_folder_is_a_failed_attempt() {
        let harness = EngineHarness::new();
        let job = Job::new("gone", "Gone", harness.dir.path().join("gone"));
        let engine = harness.engine_with(harness.capabilities_with_input());

        assert!(matches!(engine.export_job(&job, 1), JobOutcome::Failed(_)));
        assert!(harness.processes.launches().is_empty());
    }

    #[test]
    fn test_cancelled_state_is_absorbing() {
        let harness = EngineHarness::new();
        let job = harness.project("my_reel", false);
        let engine = harness.engine_with(harness.capabilities_with_input());

        engine.cancel();
        assert_eq!(engine.export_job(&job, 3), JobOutcome::Cancelled);
        assert_eq!(engine.state(), AutomationState::Cancelled);
        assert!(!engine.open_app(None));
        assert_eq!(engine.state(), AutomationState::Cancelled);
        assert!(harness.processes.launches().is_empty());

        engine.reset();
        assert_eq!(engine.state(), AutomationState::Pending);
        assert!(!engine.is_cancelled());
    }

    #[test]
    fn test_status_callback_sees_forward_progression() {
        let mut harness = EngineHarness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        harness.callbacks = HostCallbacks::new().on_status(move |state, _| {
            seen_clone.lock().unwrap().push(state);
        });
        let job = harness.project("my_reel", false);
        let engine = harness
            .engine_with(harness.capabilities_with_input())
            .with_open_strategies(vec![Box::new(CommandLineOpen)]);

        assert_eq!(engine.export_job(&job, 1), JobOutcome::Completed);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AutomationState::Pending,
                AutomationState::Starting,
                AutomationState::OpeningApp,
                AutomationState::LoadingProject,
                AutomationState::Exporting,
                AutomationState::Completed,
            ]
        );
    }

    #[test]
    fn test_vision_disabled_by_config() {
        let mut harness = EngineHarness::new();
        harness.config.vision.enabled = false;
        let patch = noise_image(20, 20, 1);
        harness.add_template("export_button", "buttons", &patch);
        let mut screen_image = noise_image(100, 100, 2);
        imageops::replace(&mut screen_image, &patch, 10, 10);
        let screen = ScriptedScreen::new(screen_image);

        let engine = harness.engine_with(screen.capabilities());
        assert!(!engine.vision_available());
        assert!(engine.template(("export_button", "buttons")).is_some());
    }
}
