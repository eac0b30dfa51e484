//! Rebase planning.
//!
//! Revision ids do not depend on ancestry, so reattaching a whole branch
//! only needs one edge to change: the earliest record of the base segment
//! gets the target head as its new predecessor. Every other record keeps
//! its `down_revision`.

use std::fmt;

use serde::Serialize;

use crate::ancestor::find_common_ancestor;
use crate::chain::Chain;
use crate::error::{RebaseError, Result};
use crate::store::RevisionStore;

/// Which of the two diverged branches a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// The branch that stays in place (the "top" head).
    Target,
    /// The branch that is moved on top of the target.
    Base,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Target => f.write_str("top"),
            Branch::Base => f.write_str("base"),
        }
    }
}

/// The single predecessor change a rebase performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relink {
    /// Record whose `down_revision` changes.
    pub revision: String,
    /// Current predecessor (the common ancestor).
    pub from: String,
    /// New predecessor (the target head).
    pub to: String,
}

/// Plan computed once per run and consumed by the rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebasePlan {
    pub common_ancestor: String,
    pub target_head: String,
    pub base_head: String,
    /// Base branch above the ancestor, oldest first, ending at `base_head`.
    pub base_segment: Vec<String>,
    /// Target branch above the ancestor, oldest first, ending at `target_head`.
    pub target_segment: Vec<String>,
    pub relink: Relink,
}

impl RebasePlan {
    /// Order in which the linearized history is applied above the ancestor:
    /// the target segment, then the base segment.
    pub fn apply_order(&self) -> impl Iterator<Item = &str> {
        self.target_segment
            .iter()
            .chain(self.base_segment.iter())
            .map(String::as_str)
    }
}

/// Compute the plan for moving `base_head`'s branch on top of `target_head`.
pub fn plan(target_head: &str, base_head: &str, store: &RevisionStore) -> Result<RebasePlan> {
    if target_head == base_head {
        return Err(RebaseError::IdenticalHeads(target_head.to_string()));
    }

    let target_chain = Chain::build(target_head, store)?;
    let base_chain = Chain::build(base_head, store)?;
    let common_ancestor = find_common_ancestor(&target_chain, &base_chain)?;

    let base_segment = segment(&base_chain, &common_ancestor, Branch::Base)?;
    let target_segment = segment(&target_chain, &common_ancestor, Branch::Target)?;

    let relink = Relink {
        revision: base_segment[0].clone(),
        from: common_ancestor.clone(),
        to: target_head.to_string(),
    };

    tracing::info!(
        ancestor = %common_ancestor,
        base = ?base_segment,
        target = ?target_segment,
        relink = %relink.revision,
        "computed rebase plan"
    );

    Ok(RebasePlan {
        common_ancestor,
        target_head: target_head.to_string(),
        base_head: base_head.to_string(),
        base_segment,
        target_segment,
        relink,
    })
}

/// Records of `chain` strictly above `ancestor`, oldest first.
fn segment(chain: &Chain, ancestor: &str, branch: Branch) -> Result<Vec<String>> {
    let above = chain
        .above(ancestor)
        .ok_or_else(|| RebaseError::NoCommonAncestor {
            left: chain.head().to_string(),
            right: ancestor.to_string(),
        })?;

    if above.is_empty() {
        return Err(RebaseError::EmptySegment {
            branch,
            head: chain.head().to_string(),
        });
    }

    Ok(above.iter().rev().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::store;

    fn scenario() -> RevisionStore {
        store(&[
            ("A", None),
            ("B", Some("A")),
            ("C", Some("B")),
            ("D", Some("A")),
            ("E", Some("D")),
        ])
    }

    #[test]
    fn plans_single_relink() {
        let plan = plan("E", "C", &scenario()).unwrap();

        assert_eq!(plan.common_ancestor, "A");
        assert_eq!(plan.base_segment, vec!["B", "C"]);
        assert_eq!(plan.target_segment, vec!["D", "E"]);
        assert_eq!(
            plan.relink,
            Relink {
                revision: "B".into(),
                from: "A".into(),
                to: "E".into(),
            }
        );
        assert_eq!(plan.apply_order().collect::<Vec<_>>(), vec!["D", "E", "B", "C"]);
    }

    #[test]
    fn identical_heads_rejected_before_lookup() {
        assert!(matches!(
            plan("missing", "missing", &scenario()),
            Err(RebaseError::IdenticalHeads(id)) if id == "missing"
        ));
    }

    #[test]
    fn unknown_head() {
        assert!(matches!(
            plan("E", "Z", &scenario()),
            Err(RebaseError::UnknownRevision(id)) if id == "Z"
        ));
    }

    #[test]
    fn base_head_is_ancestor() {
        assert!(matches!(
            plan("E", "A", &scenario()),
            Err(RebaseError::EmptySegment { branch: Branch::Base, head }) if head == "A"
        ));
        assert!(matches!(
            plan("E", "D", &scenario()),
            Err(RebaseError::EmptySegment { branch: Branch::Base, head }) if head == "D"
        ));
    }

    #[test]
    fn target_head_is_ancestor() {
        assert!(matches!(
            plan("B", "C", &scenario()),
            Err(RebaseError::EmptySegment { branch: Branch::Target, head }) if head == "B"
        ));
    }

    #[test]
    fn disjoint_graphs() {
        let store = store(&[("A", None), ("B", Some("A")), ("X", None), ("Y", Some("X"))]);
        assert!(matches!(
            plan("Y", "B", &store),
            Err(RebaseError::NoCommonAncestor { .. })
        ));
    }
}
