//! Screen vision: reference templates and where they appear on screen.
//!
//! - `matcher`: normalized correlation score maps
//! - `template`: the on-disk template library
//! - `screen`: capture, match, poll, click and read text on the live screen

pub mod matcher;
pub mod screen;
pub mod template;

pub use matcher::{NccMatcher, ScoreMap, TemplateMatch};
pub use screen::ScreenMatcher;
pub use template::{Template, TemplateStore, TemplateValidation, DEFAULT_VERSION};

/// Outcome of locating a template on screen.
///
/// `x`/`y` are the screen coordinates of the match center. A result that
/// was not found still carries the best confidence seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub found: bool,
    pub x: i32,
    pub y: i32,
    pub confidence: f32,
    pub width: u32,
    pub height: u32,
}

impl MatchResult {
    pub fn not_found(confidence: f32) -> Self {
        Self {
            found: false,
            x: 0,
            y: 0,
            confidence,
            width: 0,
            height: 0,
        }
    }

    /// Fraction of this box covered by `other`'s box.
    fn overlap(&self, other: &MatchResult) -> f32 {
        let half_w = self.width as i32 / 2;
        let half_h = self.height as i32 / 2;
        let (l1, t1) = (self.x - half_w, self.y - half_h);
        let (l2, t2) = (
            other.x - other.width as i32 / 2,
            other.y - other.height as i32 / 2,
        );
        let ix = ((l1 + self.width as i32).min(l2 + other.width as i32) - l1.max(l2)).max(0);
        let iy = ((t1 + self.height as i32).min(t2 + other.height as i32) - t1.max(t2)).max(0);
        let area = (self.width * self.height).max(1) as f32;
        (ix * iy) as f32 / area
    }
}

/// Greedy non-maximum suppression: keeps the most confident match of every
/// group whose boxes overlap by more than half.
pub fn suppress_overlaps(mut matches: Vec<MatchResult>) -> Vec<MatchResult> {
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<MatchResult> = Vec::new();
    for candidate in matches {
        if kept.iter().all(|k| k.overlap(&candidate) <= 0.5) {
            kept.push(candidate);
        }
    }
    kept
}
