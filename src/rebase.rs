//! Rebase orchestration.
//!
//! A run has two phases:
//!
//! - **prepare** loads the store, plans the relink, rewrites the artifact in
//!   memory and validates the projected store. Nothing on disk changes, so
//!   any failure here leaves the history exactly as it was.
//! - **commit** writes the artifact atomically, reloads the versions
//!   directory from disk and validates it again. A failure here is reported
//!   with `on_disk` set.
//!
//! In live mode the database is stepped down to the common ancestor between
//! the two phases and the linearized history is replayed after the commit.

use std::path::{Path, PathBuf};

use crate::error::{RebaseError, Result};
use crate::plan::{RebasePlan, plan};
use crate::rewrite::Rewrite;
use crate::runtime::{MigrationRuntime, RuntimeError};
use crate::store::RevisionStore;
use crate::validate::{IntegrityRules, IntegrityViolation, validate};

/// The two heads of one rebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseRequest {
    /// Head that stays in place ("top").
    pub target_head: String,
    /// Head whose branch is moved on top of `target_head`.
    pub base_head: String,
}

impl RebaseRequest {
    /// Arguments follow the command line: the branch that moves first, then
    /// the head it lands on. [`plan`](crate::plan::plan) takes them the other
    /// way round, as `plan(target_head, base_head, ..)`.
    pub fn new(base_head: impl Into<String>, target_head: impl Into<String>) -> Self {
        Self {
            target_head: target_head.into(),
            base_head: base_head.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rebaser {
    versions_dir: PathBuf,
    rules: IntegrityRules,
}

impl Rebaser {
    pub fn new(versions_dir: impl Into<PathBuf>) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            rules: IntegrityRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: IntegrityRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Load the versions directory and compute a validated rewrite.
    pub fn prepare(&self, request: &RebaseRequest) -> Result<PreparedRebase> {
        let store = RevisionStore::load(&self.versions_dir)?;
        self.prepare_with(store, request)
    }

    /// Plan, rewrite and validate against an already loaded store.
    pub fn prepare_with(&self, store: RevisionStore, request: &RebaseRequest) -> Result<PreparedRebase> {
        let plan = plan(&request.target_head, &request.base_head, &store)?;

        let record = store
            .get(&plan.relink.revision)
            .ok_or_else(|| RebaseError::UnknownRevision(plan.relink.revision.clone()))?;
        let rewrite = Rewrite::prepare(record, &plan.relink.to)?;

        let projected = match store.with_payload(&rewrite.revision, rewrite.updated.clone()) {
            Ok(projected) => projected,
            Err(RebaseError::MalformedRecord { source, .. }) => {
                return Err(RebaseError::Integrity {
                    violation: IntegrityViolation::Unscannable {
                        revision: rewrite.revision.clone(),
                        reason: source.to_string(),
                    },
                    on_disk: false,
                });
            }
            Err(e) => return Err(e),
        };

        validate(&projected, &plan, &self.rules).map_err(|violation| RebaseError::Integrity {
            violation,
            on_disk: false,
        })?;

        let (before, after) = rewrite.changed_line();
        tracing::debug!(revision = %rewrite.revision, %before, %after, "prepared rewrite");

        Ok(PreparedRebase {
            plan,
            rewrite,
            projected,
            versions_dir: self.versions_dir.clone(),
            rules: self.rules.clone(),
        })
    }

    /// Offline rebase: prepare, then commit.
    pub fn run(&self, request: &RebaseRequest) -> Result<RebaseOutcome> {
        self.prepare(request)?.commit()
    }

    /// Live rebase against a database.
    ///
    /// Both heads must be applied. The database is downgraded to the common
    /// ancestor before the artifact is written, so a failed downgrade leaves
    /// the files untouched, and a failed commit is reported as
    /// [`RuntimeError::CommitFailed`] naming the ancestor the database was
    /// left at. After the commit every revision above the
    /// ancestor is upgraded one at a time, target segment first.
    pub async fn run_live<R: MigrationRuntime>(
        &self,
        request: &RebaseRequest,
        runtime: &R,
    ) -> Result<LiveOutcome> {
        let heads = runtime.current_heads().await?;
        tracing::debug!(?heads, "current database heads");
        for head in [&request.target_head, &request.base_head] {
            if !heads.contains(head) {
                return Err(RuntimeError::NotCurrentHead {
                    revision: head.clone(),
                    heads,
                }
                .into());
            }
        }

        let prepared = self.prepare(request)?;

        let ancestor = prepared.plan.common_ancestor.clone();
        tracing::info!(revision = %ancestor, "downgrading to common ancestor");
        runtime.downgrade(&ancestor).await?;

        let outcome = match prepared.commit() {
            Ok(outcome) => outcome,
            Err(source) => {
                tracing::warn!(
                    %ancestor,
                    error = %source,
                    "commit failed; database is left at the common ancestor"
                );
                return Err(RuntimeError::CommitFailed {
                    ancestor,
                    source: Box::new(source),
                }
                .into());
            }
        };

        let mut applied = Vec::new();
        for revision in outcome.plan.apply_order() {
            if let Err(source) = runtime.upgrade(revision).await {
                tracing::warn!(
                    %revision,
                    applied = ?applied,
                    "upgrade failed; migration files are already rewritten"
                );
                return Err(RuntimeError::PartialApply {
                    revision: revision.to_string(),
                    applied,
                    source: Box::new(source),
                }
                .into());
            }
            tracing::info!(%revision, "upgraded");
            applied.push(revision.to_string());
        }

        Ok(LiveOutcome { outcome, applied })
    }
}

/// A rewrite that passed validation in memory and has not been written yet.
#[derive(Debug, Clone)]
pub struct PreparedRebase {
    pub plan: RebasePlan,
    pub rewrite: Rewrite,
    /// Store as it will look once the rewrite is on disk.
    pub projected: RevisionStore,
    versions_dir: PathBuf,
    rules: IntegrityRules,
}

impl PreparedRebase {
    /// Write the artifact and validate the reloaded versions directory.
    pub fn commit(self) -> Result<RebaseOutcome> {
        self.rewrite.commit()?;

        let on_disk = |violation: IntegrityViolation| RebaseError::Integrity {
            violation,
            on_disk: true,
        };

        let store = RevisionStore::load(&self.versions_dir).map_err(|e| {
            on_disk(IntegrityViolation::Unscannable {
                revision: self.rewrite.revision.clone(),
                reason: e.to_string(),
            })
        })?;
        validate(&store, &self.plan, &self.rules).map_err(on_disk)?;

        tracing::info!(
            base = %self.plan.base_head,
            onto = %self.plan.target_head,
            "rebase complete"
        );

        Ok(RebaseOutcome {
            plan: self.plan,
            rewrite: self.rewrite,
            store,
        })
    }
}

/// Result of a committed rebase.
#[derive(Debug, Clone)]
pub struct RebaseOutcome {
    pub plan: RebasePlan,
    pub rewrite: Rewrite,
    /// Store reloaded from disk after the write.
    pub store: RevisionStore,
}

#[derive(Debug, Clone)]
pub struct LiveOutcome {
    pub outcome: RebaseOutcome,
    /// Revisions upgraded after the rewrite, in order.
    pub applied: Vec<String>,
}
