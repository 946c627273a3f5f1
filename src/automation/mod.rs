//! Export automation for one project at a time.
//!
//! - `config`: timeouts, retries and application settings from config.json
//! - `state`: per-job states and the cancellation token
//! - `callbacks`: host-facing log, progress, status and completion hooks
//! - `strategy`: ordered fallbacks for opening, exporting and waiting
//! - `engine`: the open → load → export → wait → close protocol

pub mod callbacks;
pub mod config;
pub mod engine;
pub mod state;
pub mod strategy;

pub use callbacks::HostCallbacks;
pub use config::AutomationConfig;
pub use engine::AutomationEngine;
pub use state::{AutomationState, CancelToken};
