//! Integrity validation of a (possibly rewritten) revision store.
//!
//! This is the last gate before anything is applied to a database. A
//! violation observed after the artifact was written means the on-disk
//! history reflects a failed rewrite and must be reverted or repaired by
//! hand.

use std::collections::HashSet;

use thiserror::Error;

use crate::chain::Chain;
use crate::error::RebaseError;
use crate::plan::RebasePlan;
use crate::store::RevisionStore;

/// Structural rules checked on the rewritten artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityRules {
    /// Functions every migration must still define (`def <name>(`).
    pub entry_points: Vec<String>,
}

impl Default for IntegrityRules {
    fn default() -> Self {
        Self {
            entry_points: vec!["upgrade".to_string(), "downgrade".to_string()],
        }
    }
}

impl IntegrityRules {
    pub fn new(entry_points: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            entry_points: entry_points.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("revision '{revision}' points to missing predecessor '{missing}'")]
    DanglingPredecessor { revision: String, missing: String },

    #[error("cycle through revision '{revision}'")]
    Cycle { revision: String },

    /// Records not reachable from any head; only a closed loop produces this.
    #[error("revisions {0:?} are not reachable from any head")]
    Unreachable(Vec<String>),

    /// Heads are counted over the whole component containing `ancestor`.
    #[error("expected exactly one head in the history containing '{ancestor}', found {heads:?}")]
    HeadCount { ancestor: String, heads: Vec<String> },

    #[error("the single head is '{found}', expected '{expected}'")]
    UnexpectedHead { expected: String, found: String },

    #[error("revision '{revision}' is missing after the rewrite")]
    MissingRecord { revision: String },

    #[error("revision '{revision}' points to {found:?}, expected '{expected}'")]
    LinkMismatch {
        revision: String,
        expected: String,
        found: Option<String>,
    },

    #[error("rewritten artifact of '{revision}' no longer defines `{entry_point}()`")]
    MissingEntryPoint { revision: String, entry_point: String },

    #[error("rewritten artifact of '{revision}' no longer scans: {reason}")]
    Unscannable { revision: String, reason: String },
}

/// Check the graph invariants the rebase must leave behind.
///
/// Walks every head to its root (reusing the chain builder's cycle guard),
/// then requires that the component holding the common ancestor has exactly
/// one head and that it is the base head, and finally re-checks the relinked
/// record.
pub fn validate(
    store: &RevisionStore,
    plan: &RebasePlan,
    rules: &IntegrityRules,
) -> Result<(), IntegrityViolation> {
    for record in store.records() {
        if let Some(predecessor) = record.predecessor.as_deref() {
            if !store.contains(predecessor) {
                return Err(IntegrityViolation::DanglingPredecessor {
                    revision: record.id.clone(),
                    missing: predecessor.to_string(),
                });
            }
        }
    }

    let mut reached: HashSet<String> = HashSet::new();
    let mut roots = Vec::new();
    for head in store.heads() {
        let chain = Chain::build(head, store).map_err(|e| chain_violation(head, e))?;
        roots.push((head, chain.root().to_string()));
        reached.extend(chain.ids().iter().cloned());
    }

    if reached.len() != store.len() {
        let unreachable = store
            .records()
            .map(|r| r.id.clone())
            .filter(|id| !reached.contains(id))
            .collect();
        return Err(IntegrityViolation::Unreachable(unreachable));
    }

    // Every record has one predecessor, so a component is identified by its root.
    if !store.contains(&plan.common_ancestor) {
        return Err(IntegrityViolation::MissingRecord {
            revision: plan.common_ancestor.clone(),
        });
    }
    let component = Chain::build(&plan.common_ancestor, store)
        .map_err(|e| chain_violation(&plan.common_ancestor, e))?;
    let touched_heads: Vec<String> = roots
        .into_iter()
        .filter(|(_, root)| root == component.root())
        .map(|(head, _)| head.to_string())
        .collect();

    match touched_heads.as_slice() {
        [single] if *single == plan.base_head => {}
        [single] => {
            return Err(IntegrityViolation::UnexpectedHead {
                expected: plan.base_head.clone(),
                found: single.clone(),
            });
        }
        _ => {
            return Err(IntegrityViolation::HeadCount {
                ancestor: plan.common_ancestor.clone(),
                heads: touched_heads,
            });
        }
    }

    let relinked = store
        .get(&plan.relink.revision)
        .ok_or_else(|| IntegrityViolation::MissingRecord {
            revision: plan.relink.revision.clone(),
        })?;
    if relinked.predecessor.as_deref() != Some(plan.relink.to.as_str()) {
        return Err(IntegrityViolation::LinkMismatch {
            revision: relinked.id.clone(),
            expected: plan.relink.to.clone(),
            found: relinked.predecessor.clone(),
        });
    }
    for entry_point in &rules.entry_points {
        if !defines(&relinked.payload, entry_point) {
            return Err(IntegrityViolation::MissingEntryPoint {
                revision: relinked.id.clone(),
                entry_point: entry_point.clone(),
            });
        }
    }

    tracing::debug!(heads = store.heads().len(), records = store.len(), "integrity validated");
    Ok(())
}

fn defines(payload: &str, function: &str) -> bool {
    let needle = format!("def {function}(");
    payload
        .lines()
        .any(|line| line.trim_start().starts_with(&needle))
}

fn chain_violation(head: &str, err: RebaseError) -> IntegrityViolation {
    match err {
        RebaseError::CycleDetected { revision, .. } => IntegrityViolation::Cycle { revision },
        RebaseError::BrokenChain { revision, missing } => {
            IntegrityViolation::DanglingPredecessor { revision, missing }
        }
        other => IntegrityViolation::Unscannable {
            revision: head.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;
    use crate::rewrite::rewrite;
    use crate::store::tests::{artifact, store};

    fn scenario() -> RevisionStore {
        store(&[
            ("A", None),
            ("B", Some("A")),
            ("C", Some("B")),
            ("D", Some("A")),
            ("E", Some("D")),
        ])
    }

    fn rebased(store: &RevisionStore, plan: &RebasePlan) -> RevisionStore {
        let record = store.get(&plan.relink.revision).unwrap();
        let payload = rewrite(record, &plan.relink.to).unwrap();
        store.with_payload(&record.id, payload).unwrap()
    }

    #[test]
    fn accepts_linearized_history() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        let after = rebased(&original, &plan);

        validate(&after, &plan, &IntegrityRules::default()).unwrap();

        let chain = Chain::build("C", &after).unwrap();
        assert_eq!(chain.ids(), ["C", "B", "E", "D", "A"]);
        assert_eq!(after.heads(), vec!["C"]);
    }

    #[test]
    fn rejects_unrebased_history() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();

        match validate(&original, &plan, &IntegrityRules::default()) {
            Err(IntegrityViolation::HeadCount { ancestor, heads }) => {
                assert_eq!(ancestor, "A");
                assert_eq!(heads, vec!["C", "E"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn counts_heads_forking_below_the_ancestor() {
        let original = store(&[
            ("R", None),
            ("A", Some("R")),
            ("B", Some("A")),
            ("C", Some("B")),
            ("D", Some("A")),
            ("E", Some("D")),
            ("X", Some("R")),
        ]);
        let plan = plan("E", "C", &original).unwrap();
        let after = rebased(&original, &plan);
        assert_eq!(after.heads(), vec!["C", "X"]);

        assert_eq!(
            validate(&after, &plan, &IntegrityRules::default()),
            Err(IntegrityViolation::HeadCount {
                ancestor: "A".into(),
                heads: vec!["C".into(), "X".into()]
            })
        );
    }

    #[test]
    fn separate_histories_do_not_count() {
        let mut records: Vec<_> = scenario().records().cloned().collect();
        records.extend([("X", None), ("Y", Some("X"))].iter().map(|(id, down)| {
            crate::store::RevisionRecord::from_payload(format!("versions/{id}.py"), artifact(id, *down))
                .unwrap()
        }));
        let original = RevisionStore::from_records(records).unwrap();
        let plan = plan("E", "C", &original).unwrap();

        validate(&rebased(&original, &plan), &plan, &IntegrityRules::default()).unwrap();
    }

    #[test]
    fn rejects_dangling_predecessor() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        let broken = original.with_payload("D", artifact("D", Some("ghost"))).unwrap();

        assert_eq!(
            validate(&broken, &plan, &IntegrityRules::default()),
            Err(IntegrityViolation::DanglingPredecessor {
                revision: "D".into(),
                missing: "ghost".into()
            })
        );
    }

    #[test]
    fn rejects_closed_loop() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        let looped = rebased(&original, &plan)
            .with_payload("A", artifact("A", Some("E")))
            .unwrap();

        let err = validate(&looped, &plan, &IntegrityRules::default()).unwrap_err();
        assert!(matches!(err, IntegrityViolation::Cycle { .. }), "{err}");
    }

    #[test]
    fn rejects_pure_cycle_without_heads() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        let mut records: Vec<_> = rebased(&original, &plan).records().cloned().collect();
        records.extend(
            [("X", "Y"), ("Y", "X")]
                .iter()
                .map(|(id, down)| {
                    crate::store::RevisionRecord::from_payload(
                        format!("versions/{id}.py"),
                        artifact(id, Some(*down)),
                    )
                    .unwrap()
                }),
        );
        let with_ring = RevisionStore::from_records(records).unwrap();

        assert_eq!(
            validate(&with_ring, &plan, &IntegrityRules::default()),
            Err(IntegrityViolation::Unreachable(vec!["X".into(), "Y".into()]))
        );
    }

    #[test]
    fn rejects_missing_entry_point() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        let stripped = "revision = 'B'\ndown_revision = 'E'\n\ndef upgrade():\n    pass\n";
        let after = original.with_payload("B", stripped).unwrap();

        assert_eq!(
            validate(&after, &plan, &IntegrityRules::default()),
            Err(IntegrityViolation::MissingEntryPoint {
                revision: "B".into(),
                entry_point: "downgrade".into()
            })
        );
        validate(&after, &plan, &IntegrityRules::new(["upgrade"])).unwrap();
    }

    #[test]
    fn rejects_wrong_single_head() {
        let original = scenario();
        let plan = plan("E", "C", &original).unwrap();
        // D placed on top of C instead: single head E, not C.
        let after = original.with_payload("D", artifact("D", Some("C"))).unwrap();

        assert_eq!(
            validate(&after, &plan, &IntegrityRules::default()),
            Err(IntegrityViolation::UnexpectedHead {
                expected: "C".into(),
                found: "E".into()
            })
        );
    }
}
