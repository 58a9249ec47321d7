//! Parse-cache command - retry the inputs of one cache partition.

use clap::Args;
use console::style;

use nfe_core::{BatchReport, Ingestor};

use super::{ModeArg, cancel_on_ctrl_c, load_config, print_report, progress_bar, resolve_mode, track};

/// Arguments for the parse-cache command.
#[derive(Args)]
pub struct ParseCacheArgs {
    /// Partition name, as listed by `nfe cachenames`
    name: String,

    /// Processing mode (defaults to the configured one)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,
}

pub async fn run(args: ParseCacheArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mode = resolve_mode(args.mode, &config);
    let cancel = cancel_on_ctrl_c();

    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<BatchReport> {
        let mut ingestor = Ingestor::from_config(&config)?;
        if !ingestor.cache().is_valid_partition_name(&args.name)? {
            anyhow::bail!(
                "Unknown cache partition: {}. Run 'nfe cachenames' to list them.",
                args.name
            );
        }

        let inputs = ingestor.cache().entries(&args.name)?;
        println!(
            "{} Retrying {} inputs from {}",
            style("→").cyan(),
            inputs.len(),
            style(&args.name).bold()
        );

        let pb = progress_bar(inputs.len());
        let report = ingestor.process_inputs(&inputs, mode, &cancel, track(&pb))?;
        pb.finish_and_clear();
        Ok(report)
    })
    .await??;

    print_report(&report);
    Ok(())
}
