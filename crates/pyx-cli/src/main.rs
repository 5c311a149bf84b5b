//! `pyx` - lock, verify and install Pipfile projects.

mod add;
mod clean;
mod clear_cache;
mod graph;
mod install;
mod lock;
mod remove;
mod requirements;
mod sync;
mod upgrade;
mod verify;
mod why;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use pyx_pm::pipfile::{DEFAULT_CATEGORY, DEVELOP_CATEGORY};
use pyx_pm::reconcile::Project;
use pyx_pm::solver::CancelFlag;

#[derive(Parser, Debug)]
#[command(name = "pyx", version, about = "Reproducible Pipfile locking and installs")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the Pipfile and write Pipfile.lock
    Lock(lock::LockArgs),

    /// Install exactly what Pipfile.lock records
    Sync(sync::SyncArgs),

    /// Check that Pipfile.lock matches the Pipfile
    Verify(verify::VerifyArgs),

    /// Lock if needed, then sync
    Install(install::InstallArgs),

    /// Re-resolve one package, keeping the rest of the lock in place
    Upgrade(upgrade::UpgradeArgs),

    /// Upgrade one package and sync its category
    Update(upgrade::UpdateArgs),

    /// Add a package to the Pipfile and lock it
    Add(add::AddArgs),

    /// Remove a package from the Pipfile and the lock
    Remove(remove::RemoveArgs),

    /// Print the locked dependency tree
    Graph(graph::GraphArgs),

    /// Show which packages require a locked package
    Why(why::WhyArgs),

    /// Export Pipfile.lock as a pip requirements file
    Requirements(requirements::RequirementsArgs),

    /// Uninstall packages that Pipfile.lock does not record
    Clean(clean::CleanArgs),

    /// Clear the metadata and artifact cache
    #[command(name = "clear-cache", alias = "clearcache")]
    ClearCache(clear_cache::ClearCacheArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), err);
            err.downcast_ref::<pyx_pm::Error>()
                .map(pyx_pm::Error::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Lock(args) => lock::execute(args).await,
        Commands::Sync(args) => sync::execute(args).await,
        Commands::Verify(args) => verify::execute(args).await,
        Commands::Install(args) => install::execute(args).await,
        Commands::Upgrade(args) => upgrade::execute(args).await,
        Commands::Update(args) => upgrade::execute_update(args).await,
        Commands::Add(args) => add::execute(args).await,
        Commands::Remove(args) => remove::execute(args).await,
        Commands::Graph(args) => graph::execute(args).await,
        Commands::Why(args) => why::execute(args).await,
        Commands::Requirements(args) => requirements::execute(args).await,
        Commands::Clean(args) => clean::execute(args).await,
        Commands::ClearCache(args) => clear_cache::execute(args).await,
    }
}

/// `RUST_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Open the project in `working_dir`, cancelled on Ctrl-C
pub(crate) fn open_project(working_dir: &Path) -> Result<Project> {
    let working_dir = working_dir
        .canonicalize()
        .context("Failed to resolve working directory")?;

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping");
            flag.cancel();
        }
    });

    let project = Project::open(&working_dir).context("Failed to set up the project")?;
    Ok(project.cancel_flag(cancel))
}

/// Categories selected by `--categories` / `--dev`
pub(crate) fn selected_categories(categories: &[String], dev: bool) -> Vec<String> {
    let mut selected: Vec<String> = if categories.is_empty() {
        vec![DEFAULT_CATEGORY.to_string()]
    } else {
        categories.to_vec()
    };
    if dev && !selected.iter().any(|c| c == DEVELOP_CATEGORY) {
        selected.push(DEVELOP_CATEGORY.to_string());
    }
    selected
}

pub(crate) fn spinner(message: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(template);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
