//! Template matching against the live screen.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::automation::CancelToken;
use crate::diagnostics::{Diagnostics, Severity};
use crate::platform::{Capabilities, InputControl, Region, ScreenCapture, TextRecognition};
use crate::vision::{suppress_overlaps, MatchResult, Template, TemplateMatch};

pub struct ScreenMatcher {
    capture: Option<Arc<dyn ScreenCapture>>,
    input: Option<Arc<dyn InputControl>>,
    text: Option<Arc<dyn TextRecognition>>,
    matcher: Arc<dyn TemplateMatch>,
    diagnostics: Arc<Diagnostics>,
    confidence: f32,
}

impl ScreenMatcher {
    /// `confidence` is the threshold used when a call does not pass its own.
    pub fn new(caps: &Capabilities, diagnostics: Arc<Diagnostics>, confidence: f32) -> Self {
        Self {
            capture: caps.capture.clone(),
            input: caps.input.clone(),
            text: caps.text.clone(),
            matcher: Arc::clone(&caps.matcher),
            diagnostics,
            confidence,
        }
    }

    /// True when the screen can be captured.
    pub fn is_available(&self) -> bool {
        self.capture.is_some()
    }

    /// Captures the primary display, or `region` of it.
    pub fn capture_screen(&self, region: Option<Region>) -> Result<RgbaImage> {
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| anyhow!("Screen capture is not available"))?;
        capture.capture(region)
    }

    /// Locates the single best match of `template`.
    ///
    /// Capture and matching failures are logged and reported as not found.
    pub fn find_best(
        &self,
        template: &Template,
        confidence: Option<f32>,
        region: Option<Region>,
        grayscale: bool,
    ) -> MatchResult {
        let threshold = confidence.unwrap_or(self.confidence);
        let Some(screen) = self.grab(region) else {
            return MatchResult::not_found(0.0);
        };
        let map = match self.matcher.score_map(&screen, &template.image, grayscale) {
            Ok(map) => map,
            Err(e) => {
                tracing::debug!("Matching {} failed: {:#}", template.name, e);
                return MatchResult::not_found(0.0);
            }
        };
        let Some((x, y, score)) = map.peak() else {
            return MatchResult::not_found(0.0);
        };

        if score < threshold {
            return MatchResult::not_found(score);
        }
        self.located(template, region, x, y, score)
    }

    /// Every position scoring at or above the threshold, without merging
    /// neighbouring hits.
    pub fn find_all(
        &self,
        template: &Template,
        confidence: Option<f32>,
        region: Option<Region>,
    ) -> Vec<MatchResult> {
        let threshold = confidence.unwrap_or(self.confidence);
        let Some(screen) = self.grab(region) else {
            return Vec::new();
        };
        match self.matcher.score_map(&screen, &template.image, true) {
            Ok(map) => map
                .above(threshold)
                .into_iter()
                .map(|(x, y, score)| self.located(template, region, x, y, score))
                .collect(),
            Err(e) => {
                tracing::debug!("Matching {} failed: {:#}", template.name, e);
                Vec::new()
            }
        }
    }

    /// Like [`find_all`](Self::find_all), keeping one match per object.
    pub fn find_all_distinct(
        &self,
        template: &Template,
        confidence: Option<f32>,
        region: Option<Region>,
    ) -> Vec<MatchResult> {
        suppress_overlaps(self.find_all(template, confidence, region))
    }

    /// Polls until `template` appears, `timeout` passes, or `cancel` fires.
    ///
    /// On timeout a `timeout_<name>` screenshot is saved and the best
    /// confidence seen is returned in the not-found result.
    pub fn wait_for(
        &self,
        template: &Template,
        timeout: Duration,
        poll: Duration,
        confidence: Option<f32>,
        cancel: &CancelToken,
    ) -> MatchResult {
        let start = Instant::now();
        let mut best = 0.0f32;

        loop {
            if cancel.is_cancelled() {
                return MatchResult::not_found(best);
            }

            let result = self.find_best(template, confidence, None, true);
            if result.found {
                return result;
            }
            best = best.max(result.confidence);

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            if !cancel.sleep(poll.min(timeout - elapsed)) {
                return MatchResult::not_found(best);
            }
        }

        let screenshot = self.save_screenshot(&format!("timeout_{}", template.name));
        self.diagnostics.record(
            Severity::Warning,
            "wait_for",
            &format!(
                "Timed out after {:.1}s waiting for {} (best confidence {:.3})",
                timeout.as_secs_f32(),
                template.name,
                best
            ),
            screenshot,
        );
        MatchResult::not_found(best)
    }

    /// Waits for `template`, polling every `poll`, and clicks its center
    /// shifted by `offset`.
    pub fn click_on(
        &self,
        template: &Template,
        confidence: Option<f32>,
        timeout: Duration,
        poll: Duration,
        offset: (i32, i32),
        cancel: &CancelToken,
    ) -> bool {
        let result = self.wait_for(template, timeout, poll, confidence, cancel);
        if !result.found {
            return false;
        }

        let Some(input) = &self.input else {
            self.diagnostics
                .warn("Cannot click: input control is not available");
            return false;
        };

        let (x, y) = (result.x + offset.0, result.y + offset.1);
        match input.click(x, y) {
            Ok(()) => {
                self.diagnostics.log(&format!(
                    "Clicked {} at ({}, {}) confidence {:.3}",
                    template.name, x, y, result.confidence
                ));
                true
            }
            Err(e) => {
                let screenshot = self.save_screenshot("click_error");
                self.diagnostics.record(
                    Severity::Error,
                    "click_on",
                    &format!("Click on {} failed: {:#}", template.name, e),
                    screenshot,
                );
                false
            }
        }
    }

    /// OCR of one screen region. `None` when OCR is unavailable or fails.
    pub fn read_text_region(&self, region: Region, language: &str) -> Option<String> {
        let text = self.text.as_ref()?;
        let image = self.grab(Some(region))?;
        match text.recognize(&image, language) {
            Ok(s) => Some(s.trim().to_string()),
            Err(e) => {
                tracing::debug!("Text recognition failed: {:#}", e);
                None
            }
        }
    }

    /// Polls `region` until its text matches `expected` (case-insensitive).
    #[allow(clippy::too_many_arguments)]
    pub fn wait_for_text(
        &self,
        region: Region,
        expected: &str,
        timeout: Duration,
        poll: Duration,
        partial: bool,
        language: &str,
        cancel: &CancelToken,
    ) -> bool {
        let expected = expected.to_lowercase();
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if let Some(text) = self.read_text_region(region, language) {
                let text = text.to_lowercase();
                let matched = if partial {
                    text.contains(&expected)
                } else {
                    text == expected
                };
                if matched {
                    return true;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            if !cancel.sleep(poll.min(timeout - elapsed)) {
                return false;
            }
        }
    }

    /// Saves a full-screen capture into the diagnostics screenshot folder.
    pub fn save_screenshot(&self, tag: &str) -> Option<PathBuf> {
        let path = self.diagnostics.screenshot_path(tag)?;
        let image = self.grab(None)?;
        match image.save(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!("Failed to save screenshot {}: {}", path.display(), e);
                None
            }
        }
    }

    fn grab(&self, region: Option<Region>) -> Option<RgbaImage> {
        match self.capture_screen(region) {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::debug!("Screen capture failed: {:#}", e);
                None
            }
        }
    }

    fn located(
        &self,
        template: &Template,
        region: Option<Region>,
        x: u32,
        y: u32,
        score: f32,
    ) -> MatchResult {
        let (ox, oy) = region.map(|r| (r.x, r.y)).unwrap_or((0, 0));
        MatchResult {
            found: true,
            x: ox + x as i32 + (template.width / 2) as i32,
            y: oy + y as i32 + (template.height / 2) as i32,
            confidence: score,
            width: template.width,
            height: template.height,
        }
    }
}
