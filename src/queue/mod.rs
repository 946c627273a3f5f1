//! Sequencing many exports.
//!
//! - `job`: jobs, their sources and the history sink interface
//! - `history`: CSV-backed history
//! - `controller`: the FIFO queue with its background worker

pub mod controller;
pub mod history;
pub mod job;

pub use controller::{JobQueueController, QueueProgress, QueueState, QueueStatistics};
pub use history::CsvHistory;
pub use job::{FolderSource, HistorySink, Job, JobOutcome, JobSource};
