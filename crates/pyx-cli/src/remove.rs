//! Remove command - remove a package from the Pipfile and the lock.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Packages to remove
    #[arg(value_name = "PACKAGES", required = true)]
    pub packages: Vec<String>,

    /// Remove from development dependencies
    #[arg(long)]
    pub dev: bool,

    /// Category to remove from (overrides --dev)
    #[arg(long)]
    pub category: Option<String>,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: RemoveArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let category = crate::upgrade::category(args.category.clone(), args.dev);

    for name in &args.packages {
        println!("{} {}", style("Removing").red().bold(), style(name).white().bold());
        let changes = project
            .remove(&category, name)
            .await
            .with_context(|| format!("Failed to remove {}", name))?;
        crate::upgrade::print_changes(&changes);
    }

    Ok(0)
}
