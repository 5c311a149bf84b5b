//! Add command - declare a package and lock it.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Packages to add (e.g., requests or "requests>=2.31")
    #[arg(value_name = "PACKAGES", required = true)]
    pub packages: Vec<String>,

    /// Add as development dependency
    #[arg(long)]
    pub dev: bool,

    /// Category to add to (overrides --dev)
    #[arg(long)]
    pub category: Option<String>,

    /// Named source to fetch the packages from
    #[arg(long)]
    pub index: Option<String>,

    /// Environment marker restricting the packages
    #[arg(long)]
    pub markers: Option<String>,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: AddArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let category = crate::upgrade::category(args.category.clone(), args.dev);

    for spec in &args.packages {
        let (name, constraint) = parse_package_spec(spec);
        println!(
            "{} {} {}",
            style("Adding").green().bold(),
            style(&name).white().bold(),
            style(&constraint).yellow()
        );

        let changes = project
            .add(&category, &name, &constraint, args.index.as_deref(), args.markers.as_deref())
            .await
            .with_context(|| format!("Failed to add {}", spec))?;
        crate::upgrade::print_changes(&changes);
    }

    Ok(0)
}

/// Split `name<op>version` into name and constraint (`*` when absent)
fn parse_package_spec(spec: &str) -> (String, String) {
    let spec = spec.trim();
    match spec.find(['=', '<', '>', '!', '~']) {
        Some(pos) => (spec[..pos].trim().to_string(), spec[pos..].trim().to_string()),
        None => (spec.to_string(), "*".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_spec() {
        assert_eq!(parse_package_spec("requests"), ("requests".into(), "*".into()));
        assert_eq!(
            parse_package_spec("requests>=2.31,<3"),
            ("requests".into(), ">=2.31,<3".into())
        );
        assert_eq!(parse_package_spec("six == 1.16.0"), ("six".into(), "== 1.16.0".into()));
        assert_eq!(parse_package_spec("attrs~=23.1"), ("attrs".into(), "~=23.1".into()));
    }
}
