//! Conflict-driven dependency resolver.
//!
//! The solver follows the PubGrub design: knowledge is stored as
//! *incompatibilities* (sets of terms that must not all hold at once), and a
//! partial solution is grown by alternating unit propagation with version
//! decisions. When propagation finds an incompatibility that is fully
//! satisfied, conflict resolution derives a new incompatibility from it and
//! backjumps to the level where that new fact first becomes useful.
//!
//! # Architecture
//!
//! - [`Pool`]: every known candidate per package, sorted by version
//! - [`Request`]: root requirements plus floor pins from another category
//! - [`Term`] / [`VersionSet`]: version ranges as exact subsets of a
//!   package's candidate list
//! - [`Decisions`]: the partial solution, a stack of assignments with
//!   decision levels
//! - [`Policy`]: pluggable version preference
//! - [`Solver`]: the propagation / decision / conflict resolution loop
//!
//! # Example
//!
//! ```ignore
//! use pyx_pm::solver::{Policy, PoolBuilder, Request, Solver};
//!
//! let pool = PoolBuilder::new()
//!     .package("a", "1.0", &["b>=1"])
//!     .package("b", "1.2", &[])
//!     .build();
//!
//! let mut request = Request::new();
//! request.require("a", "*").unwrap();
//!
//! let policy = Policy::new();
//! let resolution = Solver::new(&pool, &policy).solve(&request)?;
//! ```

mod decisions;
mod incompatibility;
mod policy;
mod pool;
mod problem;
mod request;
mod resolution;
#[allow(clippy::module_inception)]
mod solver;
mod term;


pub use decisions::{Assignment, Decisions};
pub use incompatibility::{Cause, Incompatibility, IncompatibilityId};
pub use policy::{Policy, VersionPreference};
pub use pool::{Candidate, Pool, PoolBuilder};
pub use problem::UnsatisfiableError;
pub use request::{root_label, FloorPin, Request, RootRequirement};
pub use resolution::{Resolution, ResolvedEdge, ResolvedPackage};
pub(crate) use resolution::Dnf;
pub use solver::{CancelFlag, Solver, SolverError};
pub use term::{Relation, Term, VersionSet};
