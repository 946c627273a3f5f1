//! Platform capabilities.
//!
//! Everything that touches the real desktop sits behind one of these traits.
//! A [`Capabilities`] bundle is built once at startup and handed to the
//! vision and automation layers; a missing capability is `None` and callers
//! fall back instead of failing.

pub mod process;
#[cfg(windows)]
pub mod windows;

use anyhow::{anyhow, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use crate::automation::AutomationConfig;
use crate::ocr::TesseractOcr;
use crate::vision::{NccMatcher, TemplateMatch};

pub use process::SystemProcesses;

/// A screen rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Grabs pixels from the primary display.
pub trait ScreenCapture: Send + Sync {
    /// Captures the whole primary display, or only `region` of it.
    fn capture(&self, region: Option<Region>) -> Result<RgbaImage>;
}

/// Synthesizes mouse and keyboard input.
pub trait InputControl: Send + Sync {
    /// Left-clicks at absolute screen coordinates.
    fn click(&self, x: i32, y: i32) -> Result<()>;

    /// Presses `keys` in order, then releases them in reverse order.
    fn press_keys(&self, keys: &[Key]) -> Result<()>;

    /// Replaces the clipboard contents with `text`.
    fn set_clipboard_text(&self, text: &str) -> Result<()>;
}

/// Reports which top-level windows are currently visible.
pub trait WindowDetect: Send + Sync {
    fn window_titles(&self) -> Result<Vec<String>>;
}

/// Starts, finds and stops processes.
pub trait ProcessControl: Send + Sync {
    /// True if any process whose name contains `name` (case-insensitive) runs.
    fn is_running(&self, name: &str) -> bool;

    /// Terminates every matching process and returns how many were signalled.
    fn terminate(&self, name: &str) -> usize;

    /// Spawns `exe` with `args` without waiting for it.
    fn launch(&self, exe: &Path, args: &[OsString]) -> Result<()>;

    /// Opens `path` with the operating system's default handler.
    fn open_default(&self, path: &Path) -> Result<()>;
}

/// Reads text out of an image.
pub trait TextRecognition: Send + Sync {
    fn recognize(&self, image: &RgbaImage, language: &str) -> Result<String>;
}

/// Keys understood by [`InputControl::press_keys`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Control,
    Alt,
    Shift,
    Enter,
    Escape,
    Tab,
    Function(u8),
    Char(char),
}

/// Parses a hotkey such as `"ctrl+shift+e"` into its key sequence.
pub fn parse_hotkey(spec: &str) -> Result<Vec<Key>> {
    let mut keys = Vec::new();
    for part in spec.split('+') {
        let part = part.trim().to_lowercase();
        let key = match part.as_str() {
            "ctrl" | "control" => Key::Control,
            "alt" => Key::Alt,
            "shift" => Key::Shift,
            "enter" | "return" => Key::Enter,
            "esc" | "escape" => Key::Escape,
            "tab" => Key::Tab,
            f if f.len() > 1 && f.starts_with('f') && f[1..].chars().all(|c| c.is_ascii_digit()) => {
                let n: u8 = f[1..].parse()?;
                if !(1..=24).contains(&n) {
                    return Err(anyhow!("Function key out of range: {}", spec));
                }
                Key::Function(n)
            }
            c if c.chars().count() == 1 => Key::Char(c.chars().next().unwrap_or_default()),
            _ => return Err(anyhow!("Unknown key '{}' in hotkey '{}'", part, spec)),
        };
        keys.push(key);
    }
    if keys.is_empty() {
        return Err(anyhow!("Empty hotkey"));
    }
    Ok(keys)
}

/// The set of capabilities available to the engine.
#[derive(Clone)]
pub struct Capabilities {
    pub capture: Option<Arc<dyn ScreenCapture>>,
    pub input: Option<Arc<dyn InputControl>>,
    pub windows: Option<Arc<dyn WindowDetect>>,
    pub process: Option<Arc<dyn ProcessControl>>,
    pub text: Option<Arc<dyn TextRecognition>>,
    pub matcher: Arc<dyn TemplateMatch>,
}

impl Capabilities {
    /// Only the built-in matcher; every platform capability is missing.
    pub fn none() -> Self {
        Self {
            capture: None,
            input: None,
            windows: None,
            process: None,
            text: None,
            matcher: Arc::new(NccMatcher),
        }
    }

    /// Probes the running system for each capability.
    pub fn detect(config: &AutomationConfig) -> Self {
        let mut caps = Self::none();
        caps.process = Some(Arc::new(SystemProcesses::new()));
        caps.text = TesseractOcr::locate(config.vision.tesseract_path.as_deref())
            .map(|ocr| Arc::new(ocr) as Arc<dyn TextRecognition>);

        #[cfg(windows)]
        {
            caps.capture = Some(Arc::new(windows::GdiCapture));
            caps.input = Some(Arc::new(windows::SendInputControl::new(
                config.timing.key_delay_ms,
            )));
            caps.windows = Some(Arc::new(windows::TopLevelWindows));
        }

        caps
    }

    /// Screen matching needs both a capture source and input to act on hits.
    pub fn vision_ready(&self) -> bool {
        self.capture.is_some() && self.input.is_some()
    }

    /// Name and availability of every capability, for display.
    pub fn describe(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("screen capture", self.capture.is_some()),
            ("input control", self.input.is_some()),
            ("window detection", self.windows.is_some()),
            ("process control", self.process.is_some()),
            ("text recognition", self.text.is_some()),
            ("template matching", true),
        ]
    }
}
