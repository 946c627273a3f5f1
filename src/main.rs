//! CapCut auto-export command-line host.
//!
//! Loads config.json, turns project folders into jobs and runs them through
//! the export queue, printing progress as it goes. Also maintains the
//! template library and checks what the platform supports.

mod cli;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use capcut_autoexport::automation::{AutomationConfig, CancelToken, HostCallbacks};
use capcut_autoexport::diagnostics::{panic_message, Diagnostics, Severity};
use capcut_autoexport::paths;
use capcut_autoexport::platform::Capabilities;
use capcut_autoexport::queue::{CsvHistory, FolderSource, Job, JobQueueController, JobSource};
use capcut_autoexport::vision::{ScreenMatcher, TemplateStore, DEFAULT_VERSION};
use cli::{Cli, Command, TemplateCommand};

const LOG_FILE: &str = "capcut_autoexport.log";

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_panic_hook();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Appends panics to the log file in addition to stderr.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = panic_message(panic_info.payload());
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        let log_msg = format!("[PANIC]{} {}\n", location, msg);
        eprint!("{}", log_msg);

        let log_path = paths::get_logs_dir().join(LOG_FILE);
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            use std::io::Write;
            let _ = file.write_all(log_msg.as_bytes());
        }
    }));
}

/// Returns whether the command fully succeeded.
fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config.unwrap_or_else(paths::get_config_path);
    let mut config = AutomationConfig::load(&config_path);
    config.auto_detect();

    let screenshot_dir = paths::resolve(&config.vision.screenshot_dir);
    paths::ensure_directories(&screenshot_dir).context("Failed to create output directories")?;
    let mut diagnostics = Diagnostics::new().with_log_file(paths::get_logs_dir().join(LOG_FILE));
    if config.vision.screenshot_on_error {
        diagnostics = diagnostics.with_screenshot_dir(&screenshot_dir);
    }
    let diagnostics = Arc::new(diagnostics);

    match cli.command {
        Command::Run {
            projects,
            drafts,
            history,
        } => run_queue(config, diagnostics, &projects, drafts.as_deref(), history.as_deref()),
        Command::Templates { action } => manage_templates(&config, diagnostics, action),
        Command::Find {
            name,
            category,
            version,
            confidence,
            region,
            color,
            all,
        } => {
            let store = open_templates(&config)?;
            let version = version.unwrap_or_else(|| config.vision.template_version.clone());
            let template = store
                .get(&name, &category, &version)
                .ok_or_else(|| anyhow!("Template {}/{} not found", category, name))?;
            let caps = Capabilities::detect(&config);
            let screen = ScreenMatcher::new(&caps, diagnostics, config.vision.confidence_threshold);
            if !screen.is_available() {
                bail!("Screen capture is not available on this platform");
            }

            if all {
                let matches = screen.find_all_distinct(&template, confidence, region);
                for m in &matches {
                    println!("({}, {}) confidence {:.3}", m.x, m.y, m.confidence);
                }
                println!("{} match(es)", matches.len());
                return Ok(!matches.is_empty());
            }
            let result = screen.find_best(&template, confidence, region, !color);
            if result.found {
                println!(
                    "Found {} at ({}, {}) confidence {:.3}",
                    template.name, result.x, result.y, result.confidence
                );
            } else {
                println!("Not found (best confidence {:.3})", result.confidence);
            }
            Ok(result.found)
        }
        Command::Read {
            region,
            language,
            expect,
            timeout,
        } => {
            let caps = Capabilities::detect(&config);
            if caps.text.is_none() {
                bail!("Tesseract was not found; install it or set vision.tesseract_path");
            }
            let screen = ScreenMatcher::new(&caps, diagnostics, config.vision.confidence_threshold);
            if !screen.is_available() {
                bail!("Screen capture is not available on this platform");
            }
            let language = language.unwrap_or_else(|| config.vision.ocr_language.clone());

            let Some(expected) = expect else {
                let text = screen
                    .read_text_region(region, &language)
                    .ok_or_else(|| anyhow!("Text recognition failed"))?;
                println!("{}", text);
                return Ok(true);
            };
            let found = screen.wait_for_text(
                region,
                &expected,
                Duration::from_secs(timeout),
                Duration::from_millis(config.timing.export_poll_ms),
                true,
                &language,
                &CancelToken::new(),
            );
            println!("{}", if found { "Found" } else { "Not found" });
            Ok(found)
        }
        Command::Check => {
            let caps = Capabilities::detect(&config);
            println!("Config: {}", config_path.display());
            println!("Application: {}", config.app.exe_path.display());
            match &config.app.drafts_dir {
                Some(dir) => println!("Drafts folder: {}", dir.display()),
                None => println!("Drafts folder: not found"),
            }
            for (name, available) in caps.describe() {
                println!("  {:<18} {}", name, if available { "yes" } else { "no" });
            }
            let exe_ok = config.app.exe_path.is_file();
            if !exe_ok {
                println!("Application executable not found; set app.exe_path");
            }
            if !caps.vision_ready() {
                println!("Vision unavailable; exports use keyboard shortcuts and fixed waits");
            }
            Ok(exe_ok)
        }
    }
}

fn open_templates(config: &AutomationConfig) -> Result<TemplateStore> {
    TemplateStore::new(paths::resolve(&config.vision.templates_dir))
}

fn run_queue(
    config: AutomationConfig,
    diagnostics: Arc<Diagnostics>,
    projects: &[std::path::PathBuf],
    drafts: Option<&Path>,
    history: Option<&Path>,
) -> Result<bool> {
    let mut jobs = Vec::new();
    for project in projects {
        jobs.push(Job::from_folder(project)?);
    }
    // A bare `run` exports everything in the detected drafts folder
    let drafts = match drafts {
        Some(dir) => Some(dir.to_path_buf()),
        None if projects.is_empty() => config.app.drafts_dir.clone(),
        None => None,
    };
    if let Some(drafts) = &drafts {
        diagnostics.log(&format!("Scanning {}", drafts.display()));
        jobs.extend(FolderSource::new(drafts).jobs()?);
    }
    if jobs.is_empty() {
        bail!("No projects found; pass project folders or --drafts");
    }

    let templates = match open_templates(&config) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            diagnostics.warn(&format!("Template library unavailable: {:#}", e));
            None
        }
    };
    let caps = Capabilities::detect(&config);
    if !caps.vision_ready() {
        diagnostics.warn("Vision unavailable; using keyboard shortcuts and fixed waits");
    }

    let succeeded = Arc::new(AtomicBool::new(false));
    let succeeded_flag = Arc::clone(&succeeded);
    let callbacks = HostCallbacks::new()
        .on_progress(|current, total, name| println!("[{}/{}] {}", current, total, name))
        .on_completion(move |success, summary| {
            succeeded_flag.store(success, Ordering::SeqCst);
            println!("{}", summary);
        });

    let history_path = history
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::get_logs_dir().join("export_history.csv"));
    let history = CsvHistory::new(&history_path)
        .with_context(|| format!("Failed to open history {}", history_path.display()))?;

    let controller =
        JobQueueController::new(config, caps, templates, Arc::clone(&diagnostics), callbacks)
            .with_history(Arc::new(history));
    if !controller.start(jobs) {
        bail!("Queue did not start; see the log for details");
    }

    // Ctrl-C cancels the run and closes the application
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&interrupted)) {
            diagnostics.warn(&format!("Cannot install signal handler: {}", e));
        }
    }
    controller.wait_interruptible(&interrupted, Duration::from_millis(500));

    let stats = controller.statistics();
    tracing::info!(
        "Finished in {:.0}s: {} completed, {} failed",
        stats.elapsed.as_secs_f32(),
        stats.completed,
        stats.failed
    );
    let counts = diagnostics.counts();
    let errors = counts.get(&Severity::Error).copied().unwrap_or(0)
        + counts.get(&Severity::Critical).copied().unwrap_or(0);
    if errors > 0 {
        tracing::info!("{} error(s) recorded; see {}", errors, paths::get_logs_dir().display());
    }
    Ok(succeeded.load(Ordering::SeqCst))
}

fn manage_templates(
    config: &AutomationConfig,
    diagnostics: Arc<Diagnostics>,
    action: TemplateCommand,
) -> Result<bool> {
    let store = open_templates(config)?;
    match action {
        TemplateCommand::List { category, version } => {
            let templates = store.list(category.as_deref(), version.as_deref());
            for t in &templates {
                let version = if t.version == DEFAULT_VERSION { "" } else { t.version.as_str() };
                println!(
                    "{:<10} {:<24} {:<8} {:>4}x{:<4} {}",
                    t.category, t.name, version, t.width, t.height, t.description
                );
            }
            println!("{} template(s) in {}", templates.len(), store.root().display());
            Ok(true)
        }
        TemplateCommand::Validate {
            name,
            category,
            version,
        } => {
            let validation = store.validate(&name, &category, &version);
            if validation.is_valid() {
                println!("{}/{}: ok ({}x{})", category, name, validation.width, validation.height);
            }
            for error in &validation.errors {
                println!("{}/{}: {}", category, name, error);
            }
            Ok(validation.is_valid())
        }
        TemplateCommand::Add {
            source,
            name,
            category,
            version,
            description,
        } => Ok(store.add(&source, &name, &category, &version, &description)),
        TemplateCommand::Capture {
            name,
            region,
            category,
            version,
            description,
        } => {
            let caps = Capabilities::detect(config);
            let screen = ScreenMatcher::new(&caps, diagnostics, config.vision.confidence_threshold);
            Ok(store.capture(&screen, &name, region, &category, &version, &description))
        }
        TemplateCommand::Delete {
            name,
            category,
            version,
        } => Ok(store.delete(&name, &category, &version)),
    }
}
