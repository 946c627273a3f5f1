use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;

use super::setup::{find_tessdata_dir, find_tesseract_executable};
use crate::platform::TextRecognition;

/// A located Tesseract installation.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractOcr {
    pub fn new(executable: PathBuf) -> Self {
        let tessdata = find_tessdata_dir(&executable);
        Self {
            executable,
            tessdata,
        }
    }

    /// Locates Tesseract, returning `None` when it is not installed.
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        find_tesseract_executable(configured).map(Self::new)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl TextRecognition for TesseractOcr {
    /// Runs Tesseract on a grayscale copy of `image` and returns the trimmed text.
    fn recognize(&self, image: &RgbaImage, language: &str) -> Result<String> {
        let gray = DynamicImage::ImageRgba8(image.clone()).to_luma8();

        let temp_input = NamedTempFile::with_suffix(".png")?;
        gray.save(temp_input.path())
            .context("Failed to write OCR input image")?;

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg("stdout");
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        let output = command
            .arg("-l")
            .arg(language)
            .arg("--psm")
            .arg("6") // Assume single uniform block of text
            .output()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
