//! Install command - lock when needed, then sync.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use pyx_pm::InstallMode;

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Fail instead of re-locking when Pipfile.lock is out of date
    #[arg(long)]
    pub deploy: bool,

    /// Categories to install (default: default)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Also install the develop category
    #[arg(long)]
    pub dev: bool,

    /// Disable progress output
    #[arg(long)]
    pub no_progress: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: InstallArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let categories = crate::selected_categories(&args.categories, args.dev);
    let mode = if args.deploy { InstallMode::Deploy } else { InstallMode::Relock };

    let progress = crate::spinner("Installing", args.no_progress);
    let result = project.install(mode, &categories).await;
    progress.finish_and_clear();

    crate::sync::report(&result.context("Failed to install")?);
    Ok(0)
}
