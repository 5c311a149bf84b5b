//! Verify command - check that Pipfile.lock matches the Pipfile.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use pyx_pm::Verification;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Working directory
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,
}

pub async fn execute(args: VerifyArgs) -> Result<i32> {
    let project = crate::open_project(&args.working_dir)?;
    let verification = project.verify().context("Failed to verify Pipfile.lock")?;

    match verification {
        Verification::UpToDate => {
            println!("{} Pipfile.lock is up to date.", style("Success:").green().bold());
            Ok(0)
        }
        Verification::Stale { expected, found } => {
            let found = found.map(|h| h[h.len().saturating_sub(6)..].to_string());
            eprintln!(
                "{} Pipfile.lock ({}) is out of date. Expected: ({}).",
                style("Error:").red().bold(),
                found.as_deref().unwrap_or("missing"),
                &expected[expected.len().saturating_sub(6)..]
            );
            eprintln!("Run 'pyx lock' to update it.");
            Ok(1)
        }
    }
}
