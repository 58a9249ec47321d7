//! CLI application for NFe XML ingestion.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{cachenames, config, errors, keys, parse_cache, parse_dir};

/// NFe ingestion - load Brazilian electronic invoices into SQLite
#[derive(Parser)]
#[command(name = "nfe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every XML file in a directory
    ParseDir(parse_dir::ParseDirArgs),

    /// Retry the inputs recorded in a cache partition
    ParseCache(parse_cache::ParseCacheArgs),

    /// List cache partitions
    Cachenames,

    /// Show why the inputs in a cache partition fail
    Errors(errors::ErrorsArgs),

    /// List fiscal keys stored for a document class
    Keys(keys::KeysArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::ParseDir(args) => parse_dir::run(args, config_path).await,
        Commands::ParseCache(args) => parse_cache::run(args, config_path).await,
        Commands::Cachenames => cachenames::run(config_path).await,
        Commands::Errors(args) => errors::run(args, config_path).await,
        Commands::Keys(args) => keys::run(args, config_path).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
