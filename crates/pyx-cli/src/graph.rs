//! Graph command - show the locked dependency tree.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use pyx_pm::DependencyGraph;

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Categories to show (default: default)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Also show the develop category
    #[arg(long)]
    pub dev: bool,

    /// Start from the leaves and show what requires them
    #[arg(short = 'r', long)]
    pub reverse: bool,

    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: GraphArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let categories = crate::selected_categories(&args.categories, args.dev);

    for category in &categories {
        let graph = project
            .graph(category)
            .await
            .with_context(|| format!("Failed to build the graph of [{}]", category))?;

        if categories.len() > 1 {
            println!("{}", style(format!("[{}]", category)).cyan().bold());
        }

        let tops: Vec<&str> = if args.reverse {
            graph.packages().filter(|name| graph.dependencies(name).is_empty()).collect()
        } else {
            graph.roots().collect()
        };
        for name in tops {
            print_tree(&graph, name, args.reverse, 0, &mut Vec::new());
        }
    }

    Ok(0)
}

/// Print `package` and, recursively, its dependencies or its dependents
pub(crate) fn print_tree(graph: &DependencyGraph, package: &str, reverse: bool, depth: usize, path: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    let version = graph.version(package).unwrap_or("?");

    if depth == 0 {
        println!("{} {}", style(package).white().bold(), style(version).yellow());
    }

    // cycles end the branch
    if path.iter().any(|p| p == package) {
        return;
    }
    path.push(package.to_string());

    if reverse {
        if depth > 0 && graph.is_root(package) {
            println!("{}  {}", indent, style("(Pipfile)").cyan());
        }
        for (dependent, edge) in graph.dependents(package) {
            print_line(&indent, dependent, graph.version(dependent), &edge.constraint, path);
            print_tree(graph, dependent, reverse, depth + 1, path);
        }
    } else {
        for edge in graph.dependencies(package) {
            print_line(&indent, &edge.name, graph.version(&edge.name), &edge.constraint, path);
            print_tree(graph, &edge.name, reverse, depth + 1, path);
        }
    }

    path.pop();
}

fn print_line(indent: &str, name: &str, version: Option<&str>, constraint: &str, path: &[String]) {
    let circular = if path.iter().any(|p| p == name) {
        style(" (circular)").red().to_string()
    } else {
        String::new()
    };
    println!(
        "{}  - {} [required: {}, locked: {}]{}",
        indent,
        style(name).white(),
        style(constraint).green(),
        style(version.unwrap_or("?")).yellow(),
        circular
    );
}
