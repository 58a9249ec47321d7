//! Parse-dir command - ingest every XML file in a directory.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use console::style;
use tracing::debug;

use nfe_core::{BatchReport, Ingestor, Perspective, list_xml_files};

use super::{ModeArg, cancel_on_ctrl_c, load_config, print_report, progress_bar, resolve_mode, track};

/// Which perspectives to parse a directory from.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ParseTo {
    /// Documents are purchases; tables are named after the recipient
    Buyer,
    /// Documents are sales; tables are named after the issuer
    Seller,
    /// Buyer first, then seller
    Both,
}

impl ParseTo {
    fn perspectives(self) -> Vec<Perspective> {
        match self {
            Self::Buyer => vec![Perspective::Buyer],
            Self::Seller => vec![Perspective::Seller],
            Self::Both => vec![Perspective::Buyer, Perspective::Seller],
        }
    }
}

/// Arguments for the parse-dir command.
#[derive(Args)]
pub struct ParseDirArgs {
    /// Directory holding NFe XML files
    dir: PathBuf,

    /// Perspective to parse from
    #[arg(short = 't', long, value_enum, default_value = "buyer")]
    parse_to: ParseTo,

    /// Processing mode (defaults to the configured one)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Only re-attempt files recorded as failures
    #[arg(long)]
    retry_failed: bool,
}

pub async fn run(args: ParseDirArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mode = resolve_mode(args.mode, &config);
    let cancel = cancel_on_ctrl_c();

    let files = list_xml_files(&args.dir)?;
    if files.is_empty() {
        anyhow::bail!("No XML files found in {}", args.dir.display());
    }

    println!(
        "{} Found {} XML files in {}",
        style("ℹ").blue(),
        files.len(),
        args.dir.display()
    );

    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<BatchReport> {
        let mut ingestor = Ingestor::from_config(&config)?;
        let mut total = BatchReport::default();

        for perspective in args.parse_to.perspectives() {
            println!(
                "{} Parsing {} as {}",
                style("→").cyan(),
                args.dir.display(),
                perspective
            );

            let pb = progress_bar(files.len());
            let report = if args.retry_failed {
                ingestor.retry_failed_in_directory(&args.dir, perspective, mode, &cancel, track(&pb))?
            } else {
                ingestor.process_directory(
                    &args.dir,
                    perspective,
                    mode,
                    config.ingest.skip_cached_failures,
                    &cancel,
                    track(&pb),
                )?
            };
            pb.finish_and_clear();
            debug!("{} settled as {}: {:?}", args.dir.display(), perspective, report);

            total.merge(&report);
            if report.interrupted {
                break;
            }
        }

        Ok(total)
    })
    .await??;

    print_report(&report);
    Ok(())
}
