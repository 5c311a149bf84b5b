//! Pipfile lock and verify engine.
//!
//! Reads a `Pipfile`, resolves it with a conflict-driven solver, writes a
//! canonical `Pipfile.lock` and installs exactly what that lock records.
//!
//! # Example
//!
//! ```ignore
//! use pyx_pm::reconcile::{InstallMode, Project};
//!
//! let project = Project::open(".")?;
//! project.lock(None).await?;
//! project.install(InstallMode::Deploy, &["default".to_string()]).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod installer;
pub mod lock;
pub mod pipfile;
pub mod reconcile;
pub mod repository;
pub mod solver;
pub mod util;

pub use config::{Config, LockWait};
pub use error::{Error, ErrorKind, Result};
pub use lock::{LockDocument, LockedPackage};
pub use pipfile::{Pipfile, Specifier, SpecifierModel};
pub use reconcile::{DependencyGraph, InstallMode, LockChange, Project, SyncReport, Verification};
