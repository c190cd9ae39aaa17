use super::node::{Node, NodeKind};

/// Trait for implementing tree traversal operations.
///
/// The visitor receives callbacks when entering and exiting nodes.
pub trait TreeVisitor {
    /// Called when entering a node (before processing its children).
    ///
    /// Returns true to continue traversing children, false to skip the subtree.
    fn enter_node(&mut self, node: &Node) -> bool;

    /// Called when exiting a node (after processing its children).
    fn exit_node(&mut self, _node: &Node) {}
}

/// Walks the tree rooted at `node` depth first, in draw order.
pub fn walk_tree<V: TreeVisitor>(node: &Node, visitor: &mut V) {
    if visitor.enter_node(node) {
        for child in node.children() {
            walk_tree(child, visitor);
        }
    }
    visitor.exit_node(node);
}

/// Counts mesh nodes, which is the number of draws a traversal issues.
#[derive(Debug, Default)]
pub struct MeshCounter {
    pub count: usize,
}

impl TreeVisitor for MeshCounter {
    fn enter_node(&mut self, node: &Node) -> bool {
        if matches!(node.kind(), NodeKind::Mesh(_)) {
            self.count += 1;
        }
        true
    }
}

/// Number of mesh draws needed to draw all of `nodes`.
pub fn count_meshes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> usize {
    let mut counter = MeshCounter::default();
    for node in nodes {
        walk_tree(node, &mut counter);
    }
    counter.count
}
