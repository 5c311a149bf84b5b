//! Sync command - install exactly what Pipfile.lock records.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use pyx_pm::SyncReport;

#[derive(Args, Debug)]
pub struct SyncArgs {
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

pub async fn execute(args: SyncArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let categories = crate::selected_categories(&args.categories, args.dev);

    let progress = crate::spinner("Installing", args.no_progress);
    let result = project.sync(&categories).await;
    progress.finish_and_clear();

    report(&result.context("Failed to sync")?);
    Ok(0)
}

pub(crate) fn report(report: &SyncReport) {
    for id in &report.installed {
        println!("  {} {}", style("+").green(), style(id).white().bold());
    }
    for name in &report.deferred {
        println!("  {} {} (not managed by pyx)", style("~").yellow(), name);
    }

    if report.installed.is_empty() {
        println!(
            "{} Nothing to install, {} package(s) up to date.",
            style("Info:").cyan(),
            report.skipped.len()
        );
    } else {
        println!(
            "{} {} installed, {} up to date",
            style("Success:").green().bold(),
            report.installed.len(),
            report.skipped.len()
        );
    }
}
