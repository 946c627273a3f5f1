//! Unattended CapCut exports.
//!
//! Drives the CapCut desktop application through open → load → export →
//! wait → close for a queue of projects, locating UI controls on screen by
//! template matching and falling back to keyboard shortcuts and fixed waits
//! when they cannot be seen.

pub mod automation;
pub mod diagnostics;
pub mod ocr;
pub mod paths;
pub mod platform;
pub mod queue;
pub mod vision;

#[cfg(test)]
pub(crate) mod testing;
