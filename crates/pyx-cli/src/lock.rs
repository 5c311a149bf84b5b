//! Lock command - resolve the Pipfile and write Pipfile.lock.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Only re-lock these categories, keeping the others as locked
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Disable progress output
    #[arg(long)]
    pub no_progress: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: LockArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;

    let progress = crate::spinner("Locking", args.no_progress);
    let selected = (!args.categories.is_empty()).then_some(args.categories.as_slice());
    let result = project.lock(selected).await;
    progress.finish_and_clear();
    let lock = result.context("Failed to lock")?;

    for (category, entries) in &lock.categories {
        println!(
            "{} [{}] {} package(s)",
            style("Locked").green().bold(),
            category,
            entries.len()
        );
    }
    let hash = lock.fingerprint();
    println!(
        "{} Pipfile.lock ({}) written",
        style("Success:").green().bold(),
        &hash[hash.len().saturating_sub(6)..]
    );

    Ok(0)
}
