//! Configuration types for automation.
//!
//! Loaded from config.json at startup. Every field has a default, so a
//! partial file only overrides what it names. All durations are in
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::Region;

/// The application being driven.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Path to the application executable; found automatically when unset
    pub exe_path: PathBuf,
    /// Folder holding one subfolder per project, exported by a bare `run`
    pub drafts_dir: Option<PathBuf>,
    /// Case-insensitive substring of the process name
    pub process_name: String,
    /// Regular expressions matched against visible window titles
    pub window_titles: Vec<String>,
    /// File inside a project folder that the application opens directly
    pub primary_file: String,
    pub export_hotkey: String,
    pub open_hotkey: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            exe_path: PathBuf::new(),
            drafts_dir: None,
            process_name: "capcut".to_string(),
            window_titles: vec![
                "CapCut".to_string(),
                "剪映".to_string(),
                "JianyingPro".to_string(),
            ],
            primary_file: "draft_content.json".to_string(),
            export_hotkey: "ctrl+e".to_string(),
            open_hotkey: "ctrl+o".to_string(),
        }
    }
}

/// Screen recognition settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub enabled: bool,
    /// Minimum correlation score for a match (0.0-1.0)
    pub confidence_threshold: f32,
    pub screenshot_on_error: bool,
    pub screenshot_dir: PathBuf,
    pub templates_dir: PathBuf,
    /// Preferred template version; missing versions fall back to `default`
    pub template_version: String,
    /// Tesseract language code used for every text read
    pub ocr_language: String,
    /// Explicit Tesseract executable, otherwise searched for
    pub tesseract_path: Option<PathBuf>,
    /// Text the application shows once an export has finished. Read from
    /// `completion_text_region` when there is no `export_complete` template.
    pub completion_text: Option<String>,
    pub completion_text_region: Option<Region>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.8,
            screenshot_on_error: true,
            screenshot_dir: PathBuf::from("screenshots"),
            templates_dir: PathBuf::from("templates"),
            template_version: "default".to_string(),
            ocr_language: "eng".to_string(),
            tesseract_path: None,
            completion_text: None,
            completion_text_region: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per job, also used for export-button clicks
    pub attempts: u32,
    pub delay_ms: u64,
    /// Relaunch-and-paste attempts of the UI open strategy
    pub ui_open_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 2000,
            ui_open_attempts: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub app_open_timeout_ms: u64,
    pub project_load_timeout_ms: u64,
    pub export_timeout_ms: u64,
    /// Interval between window-title checks
    pub window_poll_ms: u64,
    /// Assumed startup time when windows cannot be inspected
    pub window_grace_ms: u64,
    /// Pause after terminating a running instance
    pub relaunch_wait_ms: u64,
    /// Fixed wait for the project to load when it cannot be observed
    pub project_load_grace_ms: u64,
    pub click_timeout_ms: u64,
    /// Pause after clicking the export button
    pub click_settle_ms: u64,
    pub export_poll_ms: u64,
    /// Duration after which a blind export wait counts as done
    pub export_fallback_wait_ms: u64,
    pub progress_log_interval_ms: u64,
    /// Wait after confirming the open dialog
    pub ui_open_grace_ms: u64,
    /// Hold time between key press and release
    pub key_delay_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            app_open_timeout_ms: 30_000,
            project_load_timeout_ms: 60_000,
            export_timeout_ms: 600_000,
            window_poll_ms: 500,
            window_grace_ms: 5_000,
            relaunch_wait_ms: 2_000,
            project_load_grace_ms: 5_000,
            click_timeout_ms: 10_000,
            click_settle_ms: 1_000,
            export_poll_ms: 2_000,
            export_fallback_wait_ms: 10_000,
            progress_log_interval_ms: 10_000,
            ui_open_grace_ms: 5_000,
            key_delay_ms: 300,
        }
    }
}

/// Complete automation configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub app: AppSettings,
    pub vision: VisionSettings,
    pub retry: RetrySettings,
    pub timing: TimingSettings,
}

/// Shorthand for building durations from the millisecond fields.
pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl AutomationConfig {
    /// Loads configuration from `path`, or returns defaults.
    ///
    /// A missing or malformed file is logged and never fatal.
    pub fn load(path: &Path) -> Self {
        tracing::info!("Looking for config at: {}", path.display());

        if !path.exists() {
            tracing::info!("{} not found. Using default config.", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Fills in the executable and drafts folder from the standard install
    /// locations when the configured ones do not exist.
    ///
    /// Returns true if anything was filled in.
    pub fn auto_detect(&mut self) -> bool {
        let local = dirs::data_local_dir();
        let program_dirs: Vec<PathBuf> = ["ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(PathBuf::from)
            .collect();
        self.detect_paths(
            &default_exe_paths(local.as_deref(), &program_dirs),
            &default_drafts_dirs(local.as_deref()),
        )
    }

    fn detect_paths(&mut self, exe_candidates: &[PathBuf], drafts_candidates: &[PathBuf]) -> bool {
        let mut found = false;

        if !self.app.exe_path.is_file() {
            if let Some(exe) = exe_candidates.iter().find(|p| p.is_file()) {
                tracing::info!("Found application at {}", exe.display());
                self.app.exe_path = exe.clone();
                found = true;
            }
        }

        if !self.app.drafts_dir.as_deref().is_some_and(Path::is_dir) {
            if let Some(dir) = drafts_candidates.iter().find(|p| p.is_dir()) {
                tracing::info!("Found drafts folder at {}", dir.display());
                self.app.drafts_dir = Some(dir.clone());
                found = true;
            }
        }
        found
    }
}

/// Standard executable locations, in the order they are checked.
fn default_exe_paths(local_data: Option<&Path>, program_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = program_dirs
        .iter()
        .map(|dir| dir.join("CapCut").join("CapCut.exe"))
        .collect();
    if let Some(local) = local_data {
        paths.push(local.join("CapCut").join("Apps").join("CapCut.exe"));
        paths.push(local.join("Programs").join("CapCut").join("CapCut.exe"));
    }
    paths
}

/// Standard drafts folders for the international and Chinese editions.
fn default_drafts_dirs(local_data: Option<&Path>) -> Vec<PathBuf> {
    let Some(local) = local_data else {
        return Vec::new();
    };
    ["JianyingPro", "CapCut"]
        .iter()
        .map(|app| {
            local
                .join(app)
                .join("User Data")
                .join("Projects")
                .join("com.lveditor.draft")
        })
        .collect()
}
