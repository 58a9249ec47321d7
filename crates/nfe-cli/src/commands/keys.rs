//! Keys command - list the fiscal keys stored for a document class.

use clap::Args;
use console::style;

use nfe_core::{FiscalStore, SqliteStore, table_name};

use super::load_config;

/// Arguments for the keys command.
#[derive(Args)]
pub struct KeysArgs {
    /// Document display name, e.g. "PURCHASE ACME LTDA"
    name: String,
}

pub async fn run(args: KeysArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let table = table_name(&args.name)?;

    if !config.storage.database_path.exists() {
        anyhow::bail!("No database at {}", config.storage.database_path.display());
    }
    let store = SqliteStore::new(&config.storage.database_path)?;

    if !store.table_exists(&table)? {
        anyhow::bail!("No table {} for {}", table, args.name);
    }

    let keys = store.select_keys(&table)?;
    for key in &keys {
        println!("{key}");
    }
    eprintln!("{} {} keys in {}", style("✓").green(), keys.len(), table);

    Ok(())
}
