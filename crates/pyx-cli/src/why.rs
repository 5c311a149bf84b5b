//! Why command - show why a package is locked (reverse dependency lookup).

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use pyx_pep440::PackageName;
use pyx_pm::pipfile::DEFAULT_CATEGORY;

#[derive(Args, Debug)]
pub struct WhyArgs {
    /// Package name to check
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Category to look in
    #[arg(long, default_value = DEFAULT_CATEGORY)]
    pub category: String,

    /// Show the full chain up to the Pipfile
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: WhyArgs) -> Result<i32> {
    let name = PackageName::new(&args.package).context("Invalid package name")?;
    let project = crate::open_project(&args.working_dir)?;
    let graph = project
        .graph(&args.category)
        .await
        .context("Failed to build the dependency graph")?;

    if !graph.contains(name.as_str()) {
        eprintln!(
            "{} Package '{}' is not locked in [{}]",
            style("Error:").red().bold(),
            args.package,
            args.category
        );
        return Ok(1);
    }

    if args.recursive {
        crate::graph::print_tree(&graph, name.as_str(), true, 0, &mut Vec::new());
        return Ok(0);
    }

    let dependents = graph.dependents(name.as_str());
    if dependents.is_empty() && !graph.is_root(name.as_str()) {
        println!(
            "{} Package '{}' is not required by any other package",
            style("Info:").cyan(),
            args.package
        );
        return Ok(0);
    }

    println!("{} is required by:\n", style(name.as_str()).white().bold());
    if graph.is_root(name.as_str()) {
        println!("  {}", style("Pipfile").cyan());
    }
    for (dependent, edge) in dependents {
        println!(
            "  {} {} {}",
            style(dependent).white().bold(),
            style(graph.version(dependent).unwrap_or("?")).yellow(),
            style(&edge.constraint).green()
        );
    }

    Ok(0)
}
