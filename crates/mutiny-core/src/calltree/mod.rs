//! Dynamic call-tree capture and testee derivation
//!
//! This module provides:
//! - `SharedMapping` / `CallTreeProbe`: the cross-process buffer and the
//!   `extern "C"` callbacks instrumented code writes through
//! - `CallTree`: the forest rebuilt from the buffer after a run
//! - `testees`: the reached functions of a test, with call-graph distances
//!
//! Nodes live in an arena indexed by insertion order; parents and children
//! are indices, so the tree is plain data with no back-pointer ownership.

mod buffer;

pub use buffer::{
    mutiny_enter_function, mutiny_leave_function, BufferError, CallTreeProbe, FunctionId,
    SharedMapping, VisitSlot, ENTER_FUNCTION_SYMBOL, LEAVE_FUNCTION_SYMBOL,
};

/// A node of the rebuilt call tree
#[derive(Debug, Clone)]
pub struct CallTreeNode {
    /// The visited function
    pub function: FunctionId,

    /// Arena index of the caller; `None` for roots
    pub parent: Option<usize>,

    /// Arena indices of callees, in first-visit order
    pub children: Vec<usize>,
}

/// The forest of first visits observed during one run
#[derive(Debug, Clone, Default)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    roots: Vec<usize>,
}

impl CallTree {
    /// Rebuild the forest from the shared buffer
    ///
    /// Slots are folded in first-visit order, which guarantees every
    /// parent's node exists before its children are emitted.
    #[must_use]
    pub fn reconstruct(mapping: &SharedMapping) -> Self {
        let mut visited: Vec<(VisitSlot, FunctionId)> = (1..mapping.slots() as FunctionId)
            .filter_map(|id| mapping.slot(id).map(|slot| (slot, id)))
            .collect();
        visited.sort_by_key(|(slot, _)| slot.order);

        let mut tree = CallTree::default();
        let mut node_of = std::collections::HashMap::new();

        for (slot, id) in visited {
            let parent = if slot.parent == 0 {
                None
            } else {
                node_of.get(&FunctionId::from(slot.parent)).copied()
            };

            let index = tree.nodes.len();
            tree.nodes.push(CallTreeNode {
                function: id,
                parent,
                children: Vec::new(),
            });
            node_of.insert(id, index);

            match parent {
                Some(parent_index) => tree.nodes[parent_index].children.push(index),
                None => tree.roots.push(index),
            }
        }

        tree
    }

    /// All nodes, in first-visit order
    #[must_use]
    pub fn nodes(&self) -> &[CallTreeNode] {
        &self.nodes
    }

    /// Arena indices of the roots
    #[must_use]
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Arena index of a function's node, if it was visited
    #[must_use]
    pub fn find(&self, function: FunctionId) -> Option<usize> {
        self.nodes.iter().position(|node| node.function == function)
    }
}

/// A function reached from a test, with its observed call-graph distance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Testee {
    /// The reached function
    pub function: FunctionId,

    /// Shortest observed distance from the test entry; 0 is the test itself
    pub distance: u32,
}

/// Derive the testees of a test from its captured call tree
///
/// Walks the subtree rooted at `entry` breadth-first, so the test itself is
/// the first element at distance 0 and callers can skip it before
/// enumerating mutations. Descendants failing `include` are dropped but
/// still traversed; candidates past `max_distance` are pruned.
#[must_use]
pub fn testees(
    tree: &CallTree,
    entry: FunctionId,
    max_distance: u32,
    mut include: impl FnMut(FunctionId) -> bool,
) -> Vec<Testee> {
    let Some(root) = tree.find(entry) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((root, 0u32));

    while let Some((index, distance)) = queue.pop_front() {
        let node = &tree.nodes[index];

        if distance == 0 || include(node.function) {
            result.push(Testee {
                function: node.function,
                distance,
            });
        }

        if distance < max_distance {
            for &child in &node.children {
                queue.push_back((child, distance + 1));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(sequence: &[(FunctionId, bool)], functions: usize) -> SharedMapping {
        let mapping = SharedMapping::new(functions).unwrap();
        let probe = CallTreeProbe::new(&mapping);
        for &(id, entering) in sequence {
            unsafe {
                if entering {
                    mutiny_enter_function(probe.addr(), id);
                } else {
                    mutiny_leave_function(probe.addr(), id);
                }
            }
        }
        mapping
    }

    // test(1) { a(2) { b(3) } c(4) }  plus an unrelated root other(5)
    fn sample_mapping() -> SharedMapping {
        capture(
            &[
                (1, true),
                (2, true),
                (3, true),
                (3, false),
                (2, false),
                (4, true),
                (4, false),
                (1, false),
                (5, true),
                (5, false),
            ],
            5,
        )
    }

    #[test]
    fn reconstruct_builds_a_forest() {
        let tree = CallTree::reconstruct(&sample_mapping());

        assert_eq!(tree.roots().len(), 2);
        let test_root = tree.find(1).unwrap();
        assert_eq!(tree.nodes()[test_root].children.len(), 2);
        let b = tree.find(3).unwrap();
        assert_eq!(tree.nodes()[b].parent, tree.find(2));
    }

    #[test]
    fn testees_are_bfs_ordered_with_test_first() {
        let tree = CallTree::reconstruct(&sample_mapping());
        let testees = testees(&tree, 1, 128, |_| true);

        let pairs: Vec<(FunctionId, u32)> =
            testees.iter().map(|t| (t.function, t.distance)).collect();
        assert_eq!(pairs, [(1, 0), (2, 1), (4, 1), (3, 2)]);
    }

    #[test]
    fn distance_cap_prunes_deep_candidates() {
        let tree = CallTree::reconstruct(&sample_mapping());
        let testees = testees(&tree, 1, 1, |_| true);

        assert!(testees.iter().all(|t| t.distance <= 1));
        assert!(testees.iter().all(|t| t.function != 3));
    }

    #[test]
    fn excluded_functions_are_dropped_but_traversed() {
        let tree = CallTree::reconstruct(&sample_mapping());
        // Exclude a(2); its callee b(3) must still appear.
        let testees = testees(&tree, 1, 128, |f| f != 2);

        assert!(testees.iter().all(|t| t.function != 2));
        assert!(testees.iter().any(|t| t.function == 3 && t.distance == 2));
    }

    #[test]
    fn unvisited_entry_yields_nothing() {
        let tree = CallTree::reconstruct(&sample_mapping());
        assert!(testees(&tree, 99, 128, |_| true).is_empty());
    }

    #[test]
    fn other_roots_are_not_testees() {
        let tree = CallTree::reconstruct(&sample_mapping());
        let testees = testees(&tree, 1, 128, |_| true);
        assert!(testees.iter().all(|t| t.function != 5));
    }
}
