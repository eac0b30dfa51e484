//! Error taxonomy for the rebase engine.
//!
//! Every variant is fatal to the current run. Nothing here is retried: each
//! one reports a precondition or invariant violation that would reproduce
//! identically until the migration files (or the database) are corrected.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::plan::Branch;
use crate::runtime::RuntimeError;
use crate::scan::ScanError;
use crate::validate::IntegrityViolation;

/// Errors produced while analysing or rewriting a migration history.
#[derive(Debug, Error)]
pub enum RebaseError {
    /// A head id was not found in the revision store.
    #[error("revision '{0}' is not present in the versions directory")]
    UnknownRevision(String),

    /// A `down_revision` points at a record that does not exist.
    #[error("revision '{revision}' points to missing predecessor '{missing}'")]
    BrokenChain { revision: String, missing: String },

    /// A record was reached twice while walking towards the root.
    #[error("cycle detected: revision '{revision}' reached twice while walking from '{head}'")]
    CycleDetected { head: String, revision: String },

    /// The two chains do not share a single revision.
    #[error("heads '{left}' and '{right}' share no common ancestor")]
    NoCommonAncestor { left: String, right: String },

    #[error("top head and base head are both '{0}'")]
    IdenticalHeads(String),

    /// One of the two branches has no records above the common ancestor.
    #[error("nothing to rebase: {branch} head '{head}' is the common ancestor")]
    EmptySegment { branch: Branch, head: String },

    /// An artifact does not carry exactly one usable `revision` and
    /// `down_revision` declaration.
    #[error("malformed migration file {}: {source}", .location.display())]
    MalformedRecord {
        location: PathBuf,
        #[source]
        source: ScanError,
    },

    /// The `down_revision` declaration could not be found again at write time.
    #[error("could not re-locate `down_revision` of '{revision}' in {}", .location.display())]
    RewriteTargetNotFound { revision: String, location: PathBuf },

    /// The artifact on disk no longer matches the snapshot the plan was built from.
    #[error("{} changed on disk after it was read; re-run the rebase", .location.display())]
    ArtifactChanged { location: PathBuf },

    /// Structural validation failed. `on_disk` is set when the failure was
    /// observed after the artifact had been written.
    #[error("integrity check failed{}: {violation}", after_write(.on_disk))]
    Integrity {
        violation: IntegrityViolation,
        on_disk: bool,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RebaseError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RebaseError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable snake_case name of the error kind, used in `--json` output.
    pub fn kind(&self) -> &'static str {
        match self {
            RebaseError::UnknownRevision(_) => "unknown_revision",
            RebaseError::BrokenChain { .. } => "broken_chain",
            RebaseError::CycleDetected { .. } => "cycle_detected",
            RebaseError::NoCommonAncestor { .. } => "no_common_ancestor",
            RebaseError::IdenticalHeads(_) => "identical_heads",
            RebaseError::EmptySegment { .. } => "empty_segment",
            RebaseError::MalformedRecord { .. } => "malformed_record",
            RebaseError::RewriteTargetNotFound { .. } => "rewrite_target_not_found",
            RebaseError::ArtifactChanged { .. } => "artifact_changed",
            RebaseError::Integrity { .. } => "integrity",
            RebaseError::Io { .. } => "io",
            RebaseError::Config(_) => "config",
            RebaseError::Runtime(_) => "runtime",
        }
    }

    /// Whether the migration files may already reflect this run.
    ///
    /// When this is true the on-disk history must be inspected (and reverted
    /// or repaired by hand) before anything is applied to a database.
    pub fn artifacts_rewritten(&self) -> bool {
        match self {
            RebaseError::Integrity { on_disk, .. } => *on_disk,
            RebaseError::Runtime(RuntimeError::PartialApply { .. }) => true,
            RebaseError::Runtime(RuntimeError::CommitFailed { source, .. }) => {
                source.artifacts_rewritten()
            }
            _ => false,
        }
    }

    /// Integrity failure observed after the artifact was written.
    pub fn integrity_after_write(&self) -> bool {
        match self {
            RebaseError::Integrity { on_disk, .. } => *on_disk,
            RebaseError::Runtime(RuntimeError::CommitFailed { source, .. }) => {
                source.integrity_after_write()
            }
            _ => false,
        }
    }

    /// Revision a live database was stepped down to before this error, if
    /// nothing was replayed on top of it.
    pub fn database_left_at(&self) -> Option<&str> {
        match self {
            RebaseError::Runtime(RuntimeError::CommitFailed { ancestor, .. }) => Some(ancestor),
            _ => None,
        }
    }
}

fn after_write(on_disk: &bool) -> &'static str {
    if *on_disk { " after rewrite" } else { "" }
}

/// Result type for rebase operations.
pub type Result<T> = std::result::Result<T, RebaseError>;
