//! Jobs and the collaborators that produce and record them.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files that mark a folder as a CapCut project.
const PROJECT_MARKERS: [&str; 2] = ["draft_content.json", "draft_info.json"];

/// One project to export. Read-only to the automation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
        }
    }

    /// Builds a job from a project folder.
    ///
    /// The display name comes from `draft_info.json` (`draft_name`), then
    /// `draft_content.json` (`name`), then the folder name.
    pub fn from_folder(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(anyhow!("Project folder not found: {}", path.display()));
        }
        let folder_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Project path has no folder name: {}", path.display()))?;

        let name = read_string_field(&path.join("draft_info.json"), "draft_name")
            .or_else(|| read_string_field(&path.join("draft_content.json"), "name"))
            .unwrap_or_else(|| folder_name.clone());

        Ok(Self::new(folder_name, name, path))
    }

    /// The project's primary data file, if it exists.
    pub fn primary_file(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.path.join(file_name);
        path.is_file().then_some(path)
    }
}

fn read_string_field(path: &Path, field: &str) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&contents).ok()?;
    value
        .get(field)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// How one job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::Failed(_) => write!(f, "failed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Supplies jobs to the host.
pub trait JobSource {
    fn jobs(&self) -> Result<Vec<Job>>;
}

/// Every project folder directly under a drafts directory.
pub struct FolderSource {
    root: PathBuf,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl JobSource for FolderSource {
    fn jobs(&self) -> Result<Vec<Job>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| anyhow!("Cannot read {}: {}", self.root.display(), e))?;

        let mut jobs: Vec<Job> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| {
                !p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'))
            })
            .filter(|p| PROJECT_MARKERS.iter().any(|m| p.join(m).is_file()))
            .filter_map(|p| Job::from_folder(&p).ok())
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }
}

/// Receives job lifecycle events for persistent history.
pub trait HistorySink: Send + Sync {
    /// Records that `job` started and returns an id for the update.
    fn job_started(&self, job: &Job) -> Option<String>;

    fn job_finished(&self, id: &str, job: &Job, outcome: &JobOutcome, duration: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_folder_prefers_draft_name() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("0412");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("draft_info.json"), r#"{"draft_name": " Holiday Reel "}"#).unwrap();
        fs::write(project.join("draft_content.json"), r#"{"name": "ignored"}"#).unwrap();

        let job = Job::from_folder(&project).unwrap();
        assert_eq!(job.id, "0412");
        assert_eq!(job.name, "Holiday Reel");
        assert_eq!(
            job.primary_file("draft_content.json"),
            Some(project.join("draft_content.json"))
        );
    }

    #[test]
    fn test_from_folder_falls_back_to_folder_name() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("Untitled 3");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("draft_content.json"), "{ broken").unwrap();

        let job = Job::from_folder(&project).unwrap();
        assert_eq!(job.name, "Untitled 3");
        assert!(Job::from_folder(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_folder_source_lists_only_projects() {
        let dir = tempdir().unwrap();
        for name in ["b_project", "a_project"] {
            let p = dir.path().join(name);
            fs::create_dir(&p).unwrap();
            fs::write(p.join("draft_content.json"), "{}").unwrap();
        }
        fs::create_dir(dir.path().join("not_a_project")).unwrap();
        fs::create_dir(dir.path().join(".recycle_bin")).unwrap();
        fs::write(dir.path().join(".recycle_bin/draft_info.json"), "{}").unwrap();

        let jobs = FolderSource::new(dir.path()).jobs().unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a_project", "b_project"]);
    }
}
