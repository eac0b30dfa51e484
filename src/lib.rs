//! # alembic-rebase
//!
//! Linearize two diverged alembic migration heads by moving one branch on
//! top of the other.
//!
//! Given the history
//!
//! ```text
//! A ← B ← C        (base head C)
//!  ↖
//!   D ← E          (top head E)
//! ```
//!
//! a rebase of `C` onto `E` rewrites a single `down_revision` (B's, from `A`
//! to `E`) and leaves `A ← D ← E ← B ← C` with one head.
//!
//! ```no_run
//! use alembic_rebase::{RebaseRequest, Rebaser};
//!
//! # fn main() -> alembic_rebase::Result<()> {
//! let outcome = Rebaser::new("migrations/versions").run(&RebaseRequest::new("C", "E"))?;
//! assert_eq!(outcome.store.heads(), vec!["C"]);
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline is a set of small pieces that can be used on their own:
//! [`scan`] reads declarations, [`store`] loads a versions directory,
//! [`chain`] and [`ancestor`] walk the graph, [`plan`] picks the edge to
//! change, [`rewrite`] edits the artifact, [`validate`] checks the result
//! and [`rebase`] strings them together.

pub mod ancestor;
pub mod chain;
pub mod config;
pub mod error;
pub mod plan;
pub mod rebase;
pub mod report;
pub mod rewrite;
pub mod runtime;
pub mod scan;
pub mod store;
pub mod validate;

pub use ancestor::find_common_ancestor;
pub use chain::Chain;
pub use config::{AlembicConfig, ConfigError, Settings};
pub use error::{RebaseError, Result};
pub use plan::{Branch, RebasePlan, Relink, plan};
pub use rebase::{LiveOutcome, PreparedRebase, RebaseOutcome, RebaseRequest, Rebaser};
pub use report::RebaseReport;
pub use rewrite::Rewrite;
pub use runtime::{AlembicRuntime, MigrationRuntime, RuntimeError};
pub use store::{RevisionRecord, RevisionStore};
pub use validate::{IntegrityRules, IntegrityViolation, validate};
