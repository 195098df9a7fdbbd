//! Lineage traversal results
//!
//! Walks of the precursor/derivative graph return an explicit tree of
//! [`TraversalNode`]s rather than a map keyed on products, so callers can
//! carry any per-node value without hashing whole rows.

use serde::{Deserialize, Serialize};

/// One visited product in a lineage walk, with the value the visitor
/// produced for it and the subtrees reached through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalNode<T> {
    pub product_id: i64,
    pub value: T,
    pub children: Vec<TraversalNode<T>>,
}

impl<T> TraversalNode<T> {
    pub fn new(product_id: i64, value: T) -> Self {
        Self {
            product_id,
            value,
            children: Vec::new(),
        }
    }

    /// Depth-first flatten of this subtree, self first.
    pub fn flatten(&self) -> Vec<&TraversalNode<T>> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.flatten());
        }
        nodes
    }

    /// Total number of nodes in this subtree, counting self.
    pub fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TraversalNode::count)
            .sum::<usize>()
    }
}

/// Flatten a forest of traversal nodes depth-first.
pub fn flatten_forest<T>(forest: &[TraversalNode<T>]) -> Vec<&TraversalNode<T>> {
    forest.iter().flat_map(TraversalNode::flatten).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_is_depth_first() {
        let mut root = TraversalNode::new(1, "a");
        let mut mid = TraversalNode::new(2, "b");
        mid.children.push(TraversalNode::new(3, "c"));
        root.children.push(mid);
        root.children.push(TraversalNode::new(4, "d"));

        let ids: Vec<i64> = root.flatten().iter().map(|n| n.product_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(root.count(), 4);
    }
}
