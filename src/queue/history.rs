//! CSV export history.
//!
//! Append-only, one row per event, opened for each write so completed jobs
//! survive a crash.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::job::{HistorySink, Job, JobOutcome};

/// Columns: timestamp, history id, job id, job name, project path, status,
/// duration in seconds, failure detail.
const CSV_HEADER: &str = "timestamp,history_id,job_id,job_name,path,status,duration_s,detail";

pub struct CsvHistory {
    path: PathBuf,
    counter: AtomicU64,
}

impl CsvHistory {
    /// Opens the history file, writing the header if it is new or empty.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        init_csv(&path)?;
        Ok(Self {
            path,
            counter: AtomicU64::new(0),
        })
    }

    fn append(&self, fields: &[&str]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open history CSV for append")?;
        let line = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
        writeln!(file, "{}", line).context("Failed to write history row")?;
        Ok(())
    }
}

/// Initializes the CSV file with a header unless it already has content.
fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        if BufReader::new(file).lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Quotes a field when it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl HistorySink for CsvHistory {
    fn job_started(&self, job: &Job) -> Option<String> {
        let id = format!(
            "{}-{}",
            Local::now().format("%Y%m%d%H%M%S"),
            self.counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let path = job.path.display().to_string();
        match self.append(&[&timestamp, &id, &job.id, &job.name, &path, "started", "", ""]) {
            Ok(()) => Some(id),
            Err(e) => {
                tracing::warn!("History write failed: {:#}", e);
                None
            }
        }
    }

    fn job_finished(&self, id: &str, job: &Job, outcome: &JobOutcome, duration: Duration) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let path = job.path.display().to_string();
        let status = outcome.to_string();
        let seconds = format!("{:.1}", duration.as_secs_f64());
        let detail = match outcome {
            JobOutcome::Failed(reason) => reason.as_str(),
            _ => "",
        };
        if let Err(e) = self.append(&[&timestamp, id, &job.id, &job.name, &path, &status, &seconds, detail]) {
            tracing::warn!("History write failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_creates_header() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("history.csv");

        CsvHistory::new(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with(CSV_HEADER));
    }

    #[test]
    fn test_new_preserves_existing() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("history.csv");
        std::fs::write(&csv_path, "existing,data\n1,2,3\n").unwrap();

        CsvHistory::new(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("existing,data"));
    }

    #[test]
    fn test_started_and_finished_rows() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("history.csv");
        let history = CsvHistory::new(&csv_path).unwrap();
        let job = Job::new("0412", "Reel, final", "/drafts/0412");

        let id = history.job_started(&job).unwrap();
        history.job_finished(
            &id,
            &job,
            &JobOutcome::Failed("Export failed after 3 attempts".to_string()),
            Duration::from_millis(12_340),
        );

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // header + started + finished
        assert!(lines[1].contains(&id));
        assert!(lines[1].contains("\"Reel, final\""));
        assert!(lines[1].contains(",started,"));
        assert!(lines[2].contains(",failed,12.3,Export failed after 3 attempts"));
    }
}
