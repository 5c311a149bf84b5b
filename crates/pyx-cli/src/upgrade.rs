//! Upgrade and update commands - re-resolve a single package.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use pyx_pm::pipfile::{DEFAULT_CATEGORY, DEVELOP_CATEGORY};
use pyx_pm::LockChange;

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Package to upgrade
    pub package: String,

    /// New version constraint to write to the Pipfile
    pub constraint: Option<String>,

    /// Upgrade in the develop category
    #[arg(long)]
    pub dev: bool,

    /// Category to upgrade in (overrides --dev)
    #[arg(long)]
    pub category: Option<String>,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Package to update
    pub package: String,

    /// Update in the develop category
    #[arg(long)]
    pub dev: bool,

    /// Category to update in (overrides --dev)
    #[arg(long)]
    pub category: Option<String>,

    /// Disable progress output
    #[arg(long)]
    pub no_progress: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: UpgradeArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let category = category(args.category, args.dev);

    let changes = project
        .upgrade(&args.package, &category, args.constraint.as_deref())
        .await
        .with_context(|| format!("Failed to upgrade {}", args.package))?;

    print_changes(&changes);
    Ok(0)
}

pub async fn execute_update(args: UpdateArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let category = category(args.category, args.dev);

    let progress = crate::spinner(&format!("Updating {}", args.package), args.no_progress);
    let result = project.update(&args.package, &category).await;
    progress.finish_and_clear();
    let (changes, report) = result.with_context(|| format!("Failed to update {}", args.package))?;

    print_changes(&changes);
    crate::sync::report(&report);
    Ok(0)
}

pub(crate) fn category(category: Option<String>, dev: bool) -> String {
    category.unwrap_or_else(|| {
        if dev { DEVELOP_CATEGORY } else { DEFAULT_CATEGORY }.to_string()
    })
}

pub(crate) fn print_changes(changes: &[LockChange]) {
    if changes.is_empty() {
        println!("{} Pipfile.lock is unchanged.", style("Info:").cyan());
        return;
    }
    for change in changes {
        let marker = match (&change.from, &change.to) {
            (None, _) => style("+").green(),
            (_, None) => style("-").red(),
            _ => style("~").yellow(),
        };
        println!("  {} {}", marker, change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category() {
        assert_eq!(category(None, false), "default");
        assert_eq!(category(None, true), "develop");
        assert_eq!(category(Some("docs".into()), true), "docs");
    }
}
