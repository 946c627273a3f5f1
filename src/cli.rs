use clap::{Parser, Subcommand};
use std::path::PathBuf;

use capcut_autoexport::platform::Region;
use capcut_autoexport::vision::DEFAULT_VERSION;

#[derive(Parser)]
#[command(name = "capcut-autoexport", version, about = "Unattended CapCut project exports")]
pub struct Cli {
    /// Configuration file (defaults to config.json next to the executable)
    #[arg(long, global = true, env = "CAPCUT_AUTOEXPORT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export projects one after another
    Run {
        /// Project folders to export, in order
        projects: Vec<PathBuf>,
        /// Also export every project found in this drafts folder
        #[arg(long)]
        drafts: Option<PathBuf>,
        /// History CSV (defaults to logs/export_history.csv)
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Manage the template library
    Templates {
        #[command(subcommand)]
        action: TemplateCommand,
    },
    /// Locate a template on the current screen
    Find {
        name: String,
        #[arg(long, default_value = "buttons")]
        category: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        confidence: Option<f32>,
        /// Search only inside `x,y,width,height`
        #[arg(long, value_parser = parse_region)]
        region: Option<Region>,
        /// Match in color instead of grayscale
        #[arg(long)]
        color: bool,
        /// Report every distinct match instead of the best one
        #[arg(long)]
        all: bool,
    },
    /// Read the text in a screen region
    Read {
        /// `x,y,width,height`
        #[arg(value_parser = parse_region)]
        region: Region,
        /// Tesseract language (defaults to vision.ocr_language)
        #[arg(long)]
        language: Option<String>,
        /// Wait until the region shows this text instead of reading once
        #[arg(long)]
        expect: Option<String>,
        /// Seconds to wait for `--expect`
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Show which platform capabilities are available
    Check,
}

#[derive(Subcommand)]
pub enum TemplateCommand {
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        version: Option<String>,
    },
    Validate {
        name: String,
        #[arg(long, default_value = "buttons")]
        category: String,
        #[arg(long, default_value = DEFAULT_VERSION)]
        version: String,
    },
    /// Copy an image file into the library
    Add {
        source: PathBuf,
        name: String,
        #[arg(long, default_value = "buttons")]
        category: String,
        #[arg(long, default_value = DEFAULT_VERSION)]
        version: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Capture a screen region into the library
    Capture {
        name: String,
        /// `x,y,width,height`
        #[arg(value_parser = parse_region)]
        region: Region,
        #[arg(long, default_value = "buttons")]
        category: String,
        #[arg(long, default_value = DEFAULT_VERSION)]
        version: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        name: String,
        #[arg(long, default_value = "buttons")]
        category: String,
        #[arg(long, default_value = DEFAULT_VERSION)]
        version: String,
    },
}

fn parse_region(value: &str) -> Result<Region, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got '{}'", value));
    };
    let number = |s: &str| s.parse::<i64>().map_err(|e| format!("'{}': {}", s, e));
    let (x, y, w, h) = (number(x)?, number(y)?, number(w)?, number(h)?);
    if w <= 0 || h <= 0 {
        return Err("width and height must be positive".to_string());
    }
    Ok(Region::new(
        i32::try_from(x).map_err(|e| e.to_string())?,
        i32::try_from(y).map_err(|e| e.to_string())?,
        u32::try_from(w).map_err(|e| e.to_string())?,
        u32::try_from(h).map_err(|e| e.to_string())?,
    ))
}
