//! Common-ancestor resolution between two chains.

use std::collections::HashMap;

use crate::chain::Chain;
use crate::error::{RebaseError, Result};

/// Nearest revision present on both chains.
///
/// Indexes `left` by id, then scans `right` from its head and returns the
/// first id found in the index. Both chains run down to a root, so their
/// overlap is a shared tail and the first hit is the branch point rather
/// than the global root. Swapping the arguments yields the same id.
pub fn find_common_ancestor(left: &Chain, right: &Chain) -> Result<String> {
    let positions: HashMap<&str, usize> = left
        .ids()
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.as_str(), pos))
        .collect();

    let found = right
        .ids()
        .iter()
        .enumerate()
        .find_map(|(right_pos, id)| positions.get(id.as_str()).map(|left_pos| (id, *left_pos, right_pos)));

    match found {
        Some((id, left_pos, right_pos)) => {
            tracing::debug!(
                ancestor = %id,
                left_distance = left_pos,
                right_distance = right_pos,
                "resolved common ancestor"
            );
            Ok(id.clone())
        }
        None => Err(RebaseError::NoCommonAncestor {
            left: left.head().to_string(),
            right: right.head().to_string(),
        }),
    }
}
