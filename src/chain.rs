//! Predecessor chains.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{RebaseError, Result};
use crate::store::RevisionStore;

/// Ordered path from a head down to the root, head first.
///
/// Each element's predecessor is the next element; the last element is a
/// root. A chain is a derived view over a [`RevisionStore`] and is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Chain {
    ids: Vec<String>,
}

impl Chain {
    /// Follow `down_revision` links from `head` until a root is reached.
    pub fn build(head: &str, store: &RevisionStore) -> Result<Self> {
        let mut current = store
            .get(head)
            .ok_or_else(|| RebaseError::UnknownRevision(head.to_string()))?;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut ids = Vec::new();

        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(RebaseError::CycleDetected {
                    head: head.to_string(),
                    revision: current.id.clone(),
                });
            }
            ids.push(current.id.clone());

            let Some(predecessor) = current.predecessor.as_deref() else {
                break;
            };
            current = store
                .get(predecessor)
                .ok_or_else(|| RebaseError::BrokenChain {
                    revision: current.id.clone(),
                    missing: predecessor.to_string(),
                })?;
        }

        Ok(Self { ids })
    }

    pub fn head(&self) -> &str {
        &self.ids[0]
    }

    pub fn root(&self) -> &str {
        &self.ids[self.ids.len() - 1]
    }

    /// Revision ids, head first.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of records on the chain (hops to the root plus one).
    ///
    /// Never zero: a chain always holds at least its head.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Distance of `id` from the head.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    /// The records strictly above `id`, head first. `None` if `id` is not on
    /// the chain.
    pub fn above(&self, id: &str) -> Option<&[String]> {
        self.position(id).map(|pos| &self.ids[..pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::store;

    #[test]
    fn builds_head_first() {
        let store = store(&[("a", None), ("b", Some("a")), ("c", Some("b"))]);
        let chain = Chain::build("c", &store).unwrap();

        assert_eq!(chain.ids(), ["c", "b", "a"]);
        assert_eq!(chain.head(), "c");
        assert_eq!(chain.root(), "a");
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.above("a").unwrap(), ["c", "b"]);
        assert_eq!(chain.above("c").unwrap(), &[] as &[String]);
        assert!(chain.above("zzz").is_none());
    }

    #[test]
    fn root_alone() {
        let store = store(&[("a", None)]);
        let chain = Chain::build("a", &store).unwrap();
        assert_eq!(chain.ids(), ["a"]);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head(), chain.root());
    }

    #[test]
    fn unknown_head() {
        let store = store(&[("a", None)]);
        assert!(matches!(
            Chain::build("nope", &store),
            Err(RebaseError::UnknownRevision(id)) if id == "nope"
        ));
    }

    #[test]
    fn broken_link() {
        let store = store(&[("a", None), ("b", Some("gone"))]);
        match Chain::build("b", &store) {
            Err(RebaseError::BrokenChain { revision, missing }) => {
                assert_eq!(revision, "b");
                assert_eq!(missing, "gone");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cycle_is_detected() {
        let ring = store(&[("x", Some("z")), ("y", Some("x")), ("z", Some("y"))]);
        match Chain::build("x", &ring) {
            Err(RebaseError::CycleDetected { head, revision }) => {
                assert_eq!(head, "x");
                assert_eq!(revision, "x");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let looped = store(&[("s", Some("s"))]);
        assert!(matches!(
            Chain::build("s", &looped),
            Err(RebaseError::CycleDetected { .. })
        ));
    }
}
