//! Clean command - uninstall packages that Pipfile.lock does not record.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Only list what would be removed
    #[arg(long)]
    pub dry_run: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: CleanArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let removed = project.clean(args.dry_run).context("Failed to clean")?;

    if removed.is_empty() {
        println!("{} Nothing to remove.", style("Info:").cyan());
        return Ok(0);
    }
    for id in &removed {
        let mark = if args.dry_run { style("~").yellow() } else { style("-").red() };
        println!("  {} {}", mark, style(id).white().bold());
    }
    Ok(0)
}
