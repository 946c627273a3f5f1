//! Process control backed by `sysinfo`, `std::process` and `open`.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{ProcessesToUpdate, System};

use super::ProcessControl;

/// How long `terminate` waits for killed processes to disappear.
const TERMINATE_WAIT: Duration = Duration::from_secs(5);

pub struct SystemProcesses {
    system: Mutex<System>,
    /// Processes started by `launch`, kept until they have exited
    children: Mutex<Vec<Child>>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Collects the exit status of launched processes that have ended.
    fn reap(&self) {
        if let Ok(mut children) = self.children.lock() {
            children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        }
    }

    /// Refreshes the process table and returns the pids whose name contains `name`.
    fn matching(&self, name: &str) -> Vec<sysinfo::Pid> {
        let needle = name.to_lowercase();
        let Ok(mut system) = self.system.lock() else {
            return Vec::new();
        };
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .filter(|(_, process)| {
                process
                    .name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&needle)
            })
            .map(|(pid, _)| *pid)
            .collect()
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn is_running(&self, name: &str) -> bool {
        !self.matching(name).is_empty()
    }

    fn terminate(&self, name: &str) -> usize {
        let pids = self.matching(name);
        let mut killed = 0;
        if let Ok(system) = self.system.lock() {
            for pid in &pids {
                if let Some(process) = system.process(*pid) {
                    if process.kill() {
                        killed += 1;
                    } else {
                        tracing::warn!("Failed to kill process {}", pid);
                    }
                }
            }
        }

        let deadline = Instant::now() + TERMINATE_WAIT;
        while killed > 0 && Instant::now() < deadline && self.is_running(name) {
            std::thread::sleep(Duration::from_millis(200));
        }
        self.reap();
        killed
    }

    fn launch(&self, exe: &Path, args: &[OsString]) -> Result<()> {
        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = exe.parent().filter(|d| d.is_dir()) {
            command.current_dir(dir);
        }
        let child = command
            .spawn()
            .with_context(|| format!("Failed to launch {}", exe.display()))?;

        self.reap();
        if let Ok(mut children) = self.children.lock() {
            children.push(child);
        }
        Ok(())
    }

    fn open_default(&self, path: &Path) -> Result<()> {
        open::that(path).with_context(|| format!("Failed to open {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_process_is_not_running() {
        let processes = SystemProcesses::new();
        assert!(!processes.is_running("no-such-process-7f3a9c"));
        assert_eq!(processes.terminate("no-such-process-7f3a9c"), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_reaps_exited_children() {
        let processes = SystemProcesses::new();
        processes
            .launch(Path::new("/bin/sh"), &[OsString::from("-c"), OsString::from("exit 0")])
            .unwrap();
        assert_eq!(processes.children.lock().unwrap().len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !processes.children.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            processes.terminate("no-such-process-7f3a9c");
        }
        assert!(processes.children.lock().unwrap().is_empty());
    }

    #[test]
    fn test_launch_missing_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let processes = SystemProcesses::new();
        let result = processes.launch(&dir.path().join("missing.exe"), &[]);
        assert!(result.is_err());
    }
}
