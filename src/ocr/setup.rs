use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::paths::get_tesseract_dir;

/// Standard install locations checked after the configured path and PATH.
const COMMON_PATHS: [&str; 4] = [
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
];

fn executable_name() -> &'static str {
    if cfg!(windows) { "tesseract.exe" } else { "tesseract" }
}

/// True if `tesseract --version` runs successfully for `program`.
fn responds(program: &Path) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Finds a usable Tesseract executable.
///
/// Order: the configured path, the per-user data directory, `tesseract` on
/// PATH, then the standard install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("Configured tesseract path does not exist: {}", path.display());
    }

    let local = get_tesseract_dir().join(executable_name());
    if local.exists() {
        return Some(local);
    }

    let on_path = PathBuf::from("tesseract");
    if responds(&on_path) {
        return Some(on_path);
    }

    COMMON_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Returns the `tessdata` directory next to the executable, if there is one.
pub fn find_tessdata_dir(executable: &Path) -> Option<PathBuf> {
    let dir = executable.parent()?.join("tessdata");
    dir.is_dir().then_some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(executable_name());
        std::fs::write(&exe, b"").unwrap();

        assert_eq!(find_tesseract_executable(Some(&exe)), Some(exe));
    }

    #[test]
    fn test_tessdata_next_to_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(executable_name());
        assert_eq!(find_tessdata_dir(&exe), None);

        std::fs::create_dir(dir.path().join("tessdata")).unwrap();
        assert_eq!(find_tessdata_dir(&exe), Some(dir.path().join("tessdata")));
    }
}
