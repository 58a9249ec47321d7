//! Errors command - explain why the inputs of a partition fail.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;

use nfe_core::ProcessingCache;
use nfe_core::diagnose::{Diagnosis, diagnose_partition, summarize_errors};

use super::{ModeArg, load_config, resolve_mode};

/// Arguments for the errors command.
#[derive(Args)]
pub struct ErrorsArgs {
    /// Partition name, as listed by `nfe cachenames`
    name: String,

    /// Group inputs by the kinds of error they hit
    #[arg(short, long)]
    summary: bool,

    /// Also write every error to a CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Processing mode used when re-extracting (defaults to the configured one)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,
}

pub async fn run(args: ErrorsArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mode = resolve_mode(args.mode, &config);
    let name = args.name.clone();

    let diagnoses = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Diagnosis>> {
        let mut cache = ProcessingCache::open(&config.cache.directory)?;
        Ok(diagnose_partition(&mut cache, &name, mode)?)
    })
    .await??;

    if args.summary {
        for group in summarize_errors(&diagnoses) {
            println!(
                "{}  {}",
                style(group.signature.to_string()).yellow(),
                group.count()
            );
        }
    } else {
        print_diagnoses(&diagnoses);
    }

    if let Some(path) = &args.csv {
        write_csv(path, &diagnoses)?;
        println!(
            "{} Errors written to {}",
            style("✓").green(),
            path.display()
        );
    }

    Ok(())
}

fn print_diagnoses(diagnoses: &[Diagnosis]) {
    for diagnosis in diagnoses {
        if diagnosis.errors.is_empty() {
            println!(
                "{} {} (no errors now)",
                style("✓").green(),
                diagnosis.input
            );
            continue;
        }

        println!("{} {}", style("✗").red(), diagnosis.input);
        for error in &diagnosis.errors {
            println!("    [{}] {}", error.kind(), error);
        }
    }
}

fn write_csv(path: &Path, diagnoses: &[Diagnosis]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for diagnosis in diagnoses {
        for row in diagnosis.rows() {
            wtr.serialize(row)?;
        }
    }
    wtr.flush()?;
    Ok(())
}
