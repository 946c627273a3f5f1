//! Ordered fallback strategies for the engine's fragile steps.
//!
//! Opening a project and triggering an export both try their strategies in
//! order until one succeeds. Waiting for completion uses the first strategy
//! that is available. An error inside a strategy counts as its failure.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::config::ms;
use super::engine::AutomationEngine;
use crate::diagnostics::Severity;
use crate::platform::Key;
use crate::queue::Job;

pub const EXPORT_BUTTON: (&str, &str) = ("export_button", "buttons");
pub const EXPORT_COMPLETE: (&str, &str) = ("export_complete", "status");
pub const PROJECT_LOADED: (&str, &str) = ("project_loaded", "status");

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// False when the capabilities this strategy needs are missing.
    fn available(&self, _engine: &AutomationEngine) -> bool {
        true
    }
}

pub trait OpenProjectStrategy: Strategy {
    fn open(&self, engine: &AutomationEngine, job: &Job) -> Result<bool>;
}

pub trait ExportStrategy: Strategy {
    fn export(&self, engine: &AutomationEngine) -> Result<bool>;
}

pub trait CompletionStrategy: Strategy {
    fn wait(&self, engine: &AutomationEngine, timeout: Duration) -> Result<bool>;
}

/// Runs `strategies` in order until one succeeds.
pub(crate) fn run_in_order<S: Strategy + ?Sized>(
    engine: &AutomationEngine,
    operation: &str,
    strategies: &[Box<S>],
    mut attempt: impl FnMut(&S) -> Result<bool>,
) -> bool {
    let diagnostics = engine.diagnostics();
    for strategy in strategies {
        if engine.is_cancelled() {
            return false;
        }
        if !strategy.available(engine) {
            diagnostics.log(&format!("{}: {} unavailable, skipping", operation, strategy.name()));
            continue;
        }

        diagnostics.log(&format!("{}: trying {}", operation, strategy.name()));
        match attempt(&**strategy) {
            Ok(true) => {
                diagnostics.log(&format!("{}: {} succeeded", operation, strategy.name()));
                return true;
            }
            Ok(false) => {
                diagnostics.log(&format!("{}: {} failed", operation, strategy.name()));
            }
            Err(e) => {
                diagnostics.record(
                    Severity::Warning,
                    operation,
                    &format!("{} raised an error: {:#}", strategy.name(), e),
                    None,
                );
            }
        }
    }

    if !engine.is_cancelled() {
        diagnostics.record(Severity::Error, operation, "All strategies failed", None);
    }
    false
}

/// Runs only the first available strategy.
pub(crate) fn run_first_available<S: Strategy + ?Sized>(
    engine: &AutomationEngine,
    operation: &str,
    strategies: &[Box<S>],
    attempt: impl FnOnce(&S) -> Result<bool>,
) -> bool {
    let diagnostics = engine.diagnostics();
    let Some(strategy) = strategies.iter().find(|s| s.available(engine)) else {
        diagnostics.record(Severity::Error, operation, "No strategy available", None);
        return false;
    };

    diagnostics.log(&format!("{}: using {}", operation, strategy.name()));
    match attempt(&**strategy) {
        Ok(result) => result,
        Err(e) => {
            diagnostics.record(
                Severity::Error,
                operation,
                &format!("{} raised an error: {:#}", strategy.name(), e),
                None,
            );
            false
        }
    }
}

/// Launch the application with the project's data file, then its folder.
pub struct CommandLineOpen;

impl Strategy for CommandLineOpen {
    fn name(&self) -> &'static str {
        "command line"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        engine.capabilities().process.is_some()
    }
}

impl OpenProjectStrategy for CommandLineOpen {
    fn open(&self, engine: &AutomationEngine, job: &Job) -> Result<bool> {
        let candidates = job
            .primary_file(&engine.config().app.primary_file)
            .into_iter()
            .chain(std::iter::once(job.path.clone()));

        for candidate in candidates {
            if engine.is_cancelled() {
                return Ok(false);
            }
            engine
                .diagnostics()
                .log(&format!("Launching with {}", candidate.display()));
            if engine.open_app(Some(&candidate)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Hand the project's data file to the operating system's default handler.
pub struct DefaultHandlerOpen;

impl Strategy for DefaultHandlerOpen {
    fn name(&self) -> &'static str {
        "default handler"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        engine.capabilities().process.is_some()
    }
}

impl OpenProjectStrategy for DefaultHandlerOpen {
    fn open(&self, engine: &AutomationEngine, job: &Job) -> Result<bool> {
        let file_name = &engine.config().app.primary_file;
        let Some(file) = job.primary_file(file_name) else {
            engine
                .diagnostics()
                .log(&format!("No {} in {}", file_name, job.path.display()));
            return Ok(false);
        };
        let process = engine
            .capabilities()
            .process
            .as_ref()
            .ok_or_else(|| anyhow!("Process control is not available"))?;

        if !engine.stop_running_instance() {
            return Ok(false);
        }
        process.open_default(&file)?;
        Ok(engine.wait_for_window(ms(engine.config().timing.app_open_timeout_ms)))
    }
}

/// Relaunch the application and drive its open dialog from the keyboard.
pub struct UiAutomationOpen;

impl Strategy for UiAutomationOpen {
    fn name(&self) -> &'static str {
        "UI automation"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        let caps = engine.capabilities();
        caps.input.is_some() && caps.process.is_some() && engine.config().retry.ui_open_attempts > 0
    }
}

impl UiAutomationOpen {
    fn attempt(&self, engine: &AutomationEngine, job: &Job) -> Result<bool> {
        if !engine.open_app(None) {
            return Ok(false);
        }
        let input = engine
            .capabilities()
            .input
            .as_ref()
            .ok_or_else(|| anyhow!("Input control is not available"))?;
        let timing = &engine.config().timing;

        input.set_clipboard_text(&job.path.to_string_lossy())?;
        engine.press_hotkey(&engine.config().app.open_hotkey)?;
        if !engine.sleep(ms(timing.click_settle_ms)) {
            return Ok(false);
        }
        input.press_keys(&[Key::Control, Key::Char('v')])?;
        if !engine.sleep(ms(timing.key_delay_ms)) {
            return Ok(false);
        }
        input.press_keys(&[Key::Enter])?;
        Ok(engine.sleep(ms(timing.ui_open_grace_ms)))
    }
}

impl OpenProjectStrategy for UiAutomationOpen {
    fn open(&self, engine: &AutomationEngine, job: &Job) -> Result<bool> {
        let attempts = engine.config().retry.ui_open_attempts;
        for attempt in 1..=attempts {
            if engine.is_cancelled() {
                return Ok(false);
            }
            engine
                .diagnostics()
                .log(&format!("UI open attempt {}/{}", attempt, attempts));
            match self.attempt(engine, job) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => engine
                    .diagnostics()
                    .warn(&format!("UI open attempt {} failed: {:#}", attempt, e)),
            }
        }
        Ok(false)
    }
}

/// Find the export button on screen and click it.
pub struct VisionExportClick;

impl Strategy for VisionExportClick {
    fn name(&self) -> &'static str {
        "vision click"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        engine.vision_available() && engine.template(EXPORT_BUTTON).is_some()
    }
}

impl ExportStrategy for VisionExportClick {
    fn export(&self, engine: &AutomationEngine) -> Result<bool> {
        let template = engine
            .template(EXPORT_BUTTON)
            .ok_or_else(|| anyhow!("Export button template missing"))?;
        let config = engine.config();
        let attempts = config.retry.attempts.max(1);

        for attempt in 1..=attempts {
            if engine.is_cancelled() {
                return Ok(false);
            }
            let clicked = engine.screen().click_on(
                &template,
                None,
                ms(config.timing.click_timeout_ms),
                ms(config.timing.window_poll_ms),
                (0, 0),
                engine.cancel_token(),
            );
            if clicked {
                return Ok(engine.sleep(ms(config.timing.click_settle_ms)));
            }

            engine.diagnostics().log(&format!(
                "Export button not clicked (attempt {}/{})",
                attempt, attempts
            ));
            if attempt < attempts && !engine.sleep(ms(config.retry.delay_ms)) {
                return Ok(false);
            }
        }
        Ok(false)
    }
}

/// Send the export keyboard shortcut and assume it worked.
pub struct HotkeyExport;

impl Strategy for HotkeyExport {
    fn name(&self) -> &'static str {
        "keyboard shortcut"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        engine.capabilities().input.is_some()
    }
}

impl ExportStrategy for HotkeyExport {
    fn export(&self, engine: &AutomationEngine) -> Result<bool> {
        engine.press_hotkey(&engine.config().app.export_hotkey)?;
        Ok(engine.sleep(ms(engine.config().timing.click_settle_ms)))
    }
}

/// Poll the screen for the export-complete indicator.
pub struct VisionCompletionWait;

impl Strategy for VisionCompletionWait {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        engine.vision_available() && engine.template(EXPORT_COMPLETE).is_some()
    }
}

impl CompletionStrategy for VisionCompletionWait {
    fn wait(&self, engine: &AutomationEngine, timeout: Duration) -> Result<bool> {
        let template = engine
            .template(EXPORT_COMPLETE)
            .ok_or_else(|| anyhow!("Export complete template missing"))?;
        let timing = &engine.config().timing;
        let poll = ms(timing.export_poll_ms);
        let log_interval = ms(timing.progress_log_interval_ms);

        let start = Instant::now();
        let mut last_log = start;
        loop {
            if engine.is_cancelled() {
                return Ok(false);
            }

            let result = engine.screen().find_best(&template, None, None, true);
            if result.found {
                engine.diagnostics().log(&format!(
                    "Export completed after {:.0}s",
                    start.elapsed().as_secs_f32()
                ));
                return Ok(true);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                let screenshot = engine.screen().save_screenshot("export_timeout");
                engine.diagnostics().record(
                    Severity::Error,
                    "wait_for_export_complete",
                    &format!("Export did not complete within {:.0}s", timeout.as_secs_f32()),
                    screenshot,
                );
                return Ok(false);
            }
            if last_log.elapsed() >= log_interval {
                engine.diagnostics().log(&format!(
                    "Waiting for export... {:.0}s elapsed",
                    elapsed.as_secs_f32()
                ));
                last_log = Instant::now();
            }
            if !engine.sleep(poll.min(timeout - elapsed)) {
                return Ok(false);
            }
        }
    }
}

/// Read the configured screen region until it shows the completion text.
pub struct TextCompletionWait;

impl Strategy for TextCompletionWait {
    fn name(&self) -> &'static str {
        "text recognition"
    }

    fn available(&self, engine: &AutomationEngine) -> bool {
        let vision = &engine.config().vision;
        vision.enabled
            && engine.screen().is_available()
            && engine.capabilities().text.is_some()
            && vision.completion_text.as_deref().is_some_and(|t| !t.trim().is_empty())
            && vision.completion_text_region.is_some()
    }
}

impl CompletionStrategy for TextCompletionWait {
    fn wait(&self, engine: &AutomationEngine, timeout: Duration) -> Result<bool> {
        let vision = &engine.config().vision;
        let (Some(expected), Some(region)) =
            (vision.completion_text.as_deref(), vision.completion_text_region)
        else {
            return Err(anyhow!("Completion text is not configured"));
        };

        let start = Instant::now();
        let done = engine.screen().wait_for_text(
            region,
            expected,
            timeout,
            ms(engine.config().timing.export_poll_ms),
            true,
            &vision.ocr_language,
            engine.cancel_token(),
        );
        if done {
            engine.diagnostics().log(&format!(
                "Export completed after {:.0}s",
                start.elapsed().as_secs_f32()
            ));
            return Ok(true);
        }

        if !engine.is_cancelled() {
            let screenshot = engine.screen().save_screenshot("export_timeout");
            engine.diagnostics().record(
                Severity::Error,
                "wait_for_export_complete",
                &format!(
                    "'{}' did not appear within {:.0}s",
                    expected,
                    timeout.as_secs_f32()
                ),
                screenshot,
            );
        }
        Ok(false)
    }
}

/// Wait a fixed time and treat the export as done.
///
/// Used when completion cannot be observed; it cannot tell a finished
/// export from a stalled one.
pub struct FixedCompletionWait;

impl Strategy for FixedCompletionWait {
    fn name(&self) -> &'static str {
        "fixed wait"
    }
}

impl CompletionStrategy for FixedCompletionWait {
    fn wait(&self, engine: &AutomationEngine, timeout: Duration) -> Result<bool> {
        let wait = ms(engine.config().timing.export_fallback_wait_ms);
        if wait < timeout {
            engine.diagnostics().log(&format!(
                "Completion cannot be detected; assuming export finishes within {:.0}s",
                wait.as_secs_f32()
            ));
            return Ok(engine.sleep(wait));
        }

        if engine.sleep(timeout) {
            engine.diagnostics().record(
                Severity::Error,
                "wait_for_export_complete",
                &format!("Export timeout after {:.0}s", timeout.as_secs_f32()),
                None,
            );
        }
        Ok(false)
    }
}

pub fn default_open_strategies() -> Vec<Box<dyn OpenProjectStrategy>> {
    vec![
        Box::new(CommandLineOpen),
        Box::new(DefaultHandlerOpen),
        Box::new(UiAutomationOpen),
    ]
}

pub fn default_export_strategies() -> Vec<Box<dyn ExportStrategy>> {
    vec![Box::new(VisionExportClick), Box::new(HotkeyExport)]
}

pub fn default_completion_strategies() -> Vec<Box<dyn CompletionStrategy>> {
    vec![
        Box::new(VisionCompletionWait),
        Box::new(TextCompletionWait),
        Box::new(FixedCompletionWait),
    ]
}
