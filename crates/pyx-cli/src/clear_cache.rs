//! Clear-cache command - drop cached metadata and artifacts.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::time::Duration;

use pyx_pm::cache::Cache;
use pyx_pm::Config;

#[derive(Args, Debug)]
pub struct ClearCacheArgs {
    /// Only remove entries older than this many days
    #[arg(long)]
    pub older_than: Option<u64>,
}

pub async fn execute(args: ClearCacheArgs) -> Result<i32> {
    let config = Config::from_env();
    let Some(dir) = config.cache_dir else {
        println!("{} Caching is disabled.", style("Info:").cyan());
        return Ok(0);
    };
    let cache = Cache::new(dir.clone());

    match args.older_than {
        Some(days) => {
            let removed = cache
                .gc(Duration::from_secs(days * 24 * 60 * 60))
                .context("Failed to clean the cache")?;
            println!(
                "{} Removed {} cache entries from {}",
                style("Success:").green().bold(),
                removed,
                dir.display()
            );
        }
        None => {
            cache.clear().context("Failed to clear the cache")?;
            println!("{} Cleared {}", style("Success:").green().bold(), dir.display());
        }
    }

    Ok(0)
}
