//! Run reports: colored terminal output and `--json` documents.

use std::fmt::Write as _;
use std::path::PathBuf;

use colored::*;
use serde::Serialize;

use crate::error::RebaseError;
use crate::plan::RebasePlan;
use crate::rebase::{PreparedRebase, RebaseOutcome};
use crate::rewrite::Rewrite;

/// The one `down_revision` edit of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub revision: String,
    pub file: PathBuf,
    pub from: Option<String>,
    pub to: String,
    pub before: String,
    pub after: String,
}

impl From<&Rewrite> for ChangeSummary {
    fn from(rewrite: &Rewrite) -> Self {
        let (before, after) = rewrite.changed_line();
        Self {
            revision: rewrite.revision.clone(),
            file: rewrite.location.clone(),
            from: rewrite.previous.clone(),
            to: rewrite.predecessor.clone(),
            before,
            after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebaseReport {
    /// `--dry-run`: validated in memory, nothing written.
    Planned {
        plan: RebasePlan,
        change: ChangeSummary,
    },
    Rebased {
        plan: RebasePlan,
        change: ChangeSummary,
        /// Revisions upgraded on the database, in order.
        applied: Vec<String>,
        offline: bool,
    },
    Error {
        kind: String,
        message: String,
        artifacts_rewritten: bool,
        /// Revision a live database was left at, when it was downgraded and
        /// nothing was replayed.
        #[serde(skip_serializing_if = "Option::is_none")]
        database_left_at: Option<String>,
    },
}

impl RebaseReport {
    pub fn planned(prepared: &PreparedRebase) -> Self {
        RebaseReport::Planned {
            plan: prepared.plan.clone(),
            change: ChangeSummary::from(&prepared.rewrite),
        }
    }

    pub fn rebased(outcome: &RebaseOutcome, applied: Vec<String>, offline: bool) -> Self {
        RebaseReport::Rebased {
            plan: outcome.plan.clone(),
            change: ChangeSummary::from(&outcome.rewrite),
            applied,
            offline,
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>, artifacts_rewritten: bool) -> Self {
        RebaseReport::Error {
            kind: kind.into(),
            message: message.into(),
            artifacts_rewritten,
            database_left_at: None,
        }
    }

    /// Report for `err`, with `message` as the user-facing text.
    pub fn failure(err: &RebaseError, message: impl Into<String>) -> Self {
        RebaseReport::Error {
            kind: err.kind().to_string(),
            message: message.into(),
            artifacts_rewritten: err.artifacts_rewritten(),
            database_left_at: err.database_left_at().map(str::to_string),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            RebaseReport::Planned { plan, change } => {
                let _ = writeln!(out, "{}", "📋 Rebase plan (dry-run)".cyan().bold());
                render_plan(&mut out, plan, change);
                let _ = writeln!(out, "{}", "✓ Validated in memory; no files were changed".green());
            }
            RebaseReport::Rebased {
                plan,
                change,
                applied,
                offline,
            } => {
                let _ = writeln!(
                    out,
                    "{} {} onto {}",
                    "Rebasing".cyan().bold(),
                    plan.base_head.yellow(),
                    plan.target_head.yellow()
                );
                render_plan(&mut out, plan, change);
                if *offline {
                    let _ = writeln!(out, "  {} Database not touched (--offline)", "→".cyan());
                } else {
                    for revision in applied {
                        let _ = writeln!(out, "  {} upgraded {}", "✓".green(), revision);
                    }
                }
                let _ = writeln!(
                    out,
                    "{} History is linear; single head {}",
                    "✓".green(),
                    plan.base_head.green().bold()
                );
            }
            RebaseReport::Error {
                kind,
                message,
                artifacts_rewritten,
                database_left_at,
            } => {
                let _ = writeln!(out, "{} {} ({})", "✗".red().bold(), message, kind.dimmed());
                if *artifacts_rewritten {
                    let _ = writeln!(
                        out,
                        "  {}",
                        "Migration files were already rewritten; inspect them before applying anything."
                            .red()
                    );
                }
                if let Some(revision) = database_left_at {
                    let _ = writeln!(
                        out,
                        "  {} Database was downgraded to {} and nothing was re-applied",
                        "!".yellow().bold(),
                        revision.yellow()
                    );
                }
            }
        }
        out
    }
}

impl From<&RebaseError> for RebaseReport {
    fn from(err: &RebaseError) -> Self {
        RebaseReport::failure(err, err.to_string())
    }
}

fn render_plan(out: &mut String, plan: &RebasePlan, change: &ChangeSummary) {
    let _ = writeln!(out, "  {} {}", "Common ancestor:".dimmed(), plan.common_ancestor.yellow());
    let _ = writeln!(
        out,
        "  {} {}",
        "Top segment:    ".dimmed(),
        plan.target_segment.join(" → ")
    );
    let _ = writeln!(
        out,
        "  {} {}",
        "Base segment:   ".dimmed(),
        plan.base_segment.join(" → ")
    );
    let _ = writeln!(out, "  {} {}", "File:".dimmed(), change.file.display());
    let _ = writeln!(out, "    {} {}", "-".red(), change.before.red());
    let _ = writeln!(out, "    {} {}", "+".green(), change.after.green());
}
