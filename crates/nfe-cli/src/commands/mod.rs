//! Subcommands and the helpers they share.

pub mod cachenames;
pub mod config;
pub mod errors;
pub mod keys;
pub mod parse_cache;
pub mod parse_dir;

use std::path::PathBuf;

use clap::ValueEnum;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use nfe_core::{BatchReport, CancelToken, Mode, NfeConfig, Outcome, ParserInput};

/// Processing mode as accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Fact rows only
    FactOnly,
    /// Fact rows and product lines
    Full,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::FactOnly => Mode::FactOnly,
            ModeArg::Full => Mode::Full,
        }
    }
}

/// Pick the mode from the command line, falling back to the config.
pub fn resolve_mode(arg: Option<ModeArg>, config: &NfeConfig) -> Mode {
    arg.map(Mode::from).unwrap_or(config.ingest.default_mode)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nfe")
        .join("config.json")
}

/// The config file in use: `--config` if given, else the default location.
pub fn config_path(explicit: Option<&str>) -> PathBuf {
    explicit.map(PathBuf::from).unwrap_or_else(default_config_path)
}

/// Load the config file, or defaults when it does not exist.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<NfeConfig> {
    let path = config_path(explicit);
    if path.exists() {
        Ok(NfeConfig::from_file(&path)?)
    } else if explicit.is_some() {
        anyhow::bail!("Config file not found: {}", path.display())
    } else {
        Ok(NfeConfig::default())
    }
}

/// Cancellation token tripped by Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Interrupted, stopping after the current document",
                style("!").yellow()
            );
            token.cancel();
        }
    });
    cancel
}

pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Progress callback: advance the bar and surface failures above it.
pub fn track(pb: &ProgressBar) -> impl FnMut(&ParserInput, &Outcome) + '_ {
    move |input, outcome| {
        pb.inc(1);
        match outcome {
            Outcome::CouldNotRead { .. } => pb.println(format!(
                "{} {} could not be read",
                style("✗").red(),
                input.path.display()
            )),
            Outcome::Failed { partition, errors } => pb.println(format!(
                "{} {} failed ({} errors, cached under {})",
                style("✗").red(),
                input.path.display(),
                errors.len(),
                partition
            )),
            _ => {}
        }
    }
}

pub fn print_report(report: &BatchReport) {
    println!();
    if report.interrupted {
        println!("{} Interrupted before the batch finished", style("!").yellow());
    }
    println!(
        "{} Processed {} inputs ({} skipped)",
        style("✓").green(),
        report.processed,
        report.skipped
    );
    println!(
        "   {} inserted, {} already stored, {} failed ({} unreadable), {} recovered",
        style(report.inserted).green(),
        report.already_stored,
        style(report.failed).red(),
        report.could_not_read,
        style(report.recovered).cyan()
    );
}
