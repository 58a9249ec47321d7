//! Cachenames command - list cache partitions with their sizes.

use console::style;

use nfe_core::ProcessingCache;
use nfe_core::cache::{COULD_NOT_READ, is_success_partition};

use super::load_config;

pub async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut cache = ProcessingCache::open(&config.cache.directory)?;

    let names = cache.cache_names()?;
    if names.is_empty() {
        println!(
            "{} No cache partitions in {}",
            style("ℹ").blue(),
            cache.directory().display()
        );
        return Ok(());
    }

    for name in names {
        let len = cache.partition(&name)?.len();
        let label = if is_success_partition(&name) {
            style(name).green()
        } else if name == COULD_NOT_READ {
            style(name).red()
        } else {
            style(name).yellow()
        };
        println!("{label}  ({len})");
    }

    Ok(())
}
