//! Requirements command - export Pipfile.lock in pip's requirements format.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use pyx_pm::pipfile::DEVELOP_CATEGORY;

#[derive(Args, Debug)]
pub struct RequirementsArgs {
    /// Categories to export (default: default)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Also export the develop category
    #[arg(long)]
    pub dev: bool,

    /// Export only the develop category
    #[arg(long, conflicts_with_all = ["dev", "categories"])]
    pub dev_only: bool,

    /// Append the locked hashes to every line
    #[arg(long)]
    pub hash: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: RequirementsArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let categories = if args.dev_only {
        vec![DEVELOP_CATEGORY.to_string()]
    } else {
        crate::selected_categories(&args.categories, args.dev)
    };

    let text = project
        .requirements(&categories, args.hash)
        .context("Failed to export requirements")?;
    print!("{}", text);
    Ok(0)
}
