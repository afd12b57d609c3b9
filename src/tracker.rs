//! Per-invocation traversal state handed to strategies.

use std::collections::HashSet;

use crate::node::Node;

/// Tracks visited, to-be-traversed and selected nodes for one traversal.
///
/// Strategies only ever call [`traverse`](Self::traverse) and
/// [`select`](Self::select). Both are idempotent per node id.
#[derive(Debug)]
pub struct NodeTracker {
    select_k: usize,
    max_depth: usize,
    max_traverse: Option<usize>,
    visited: HashSet<String>,
    selected_ids: HashSet<String>,
    to_traverse: Vec<Node>,
    selected: Vec<Node>,
}

impl NodeTracker {
    pub fn new(select_k: usize, max_depth: usize) -> Self {
        Self {
            select_k,
            max_depth,
            max_traverse: None,
            visited: HashSet::new(),
            selected_ids: HashSet::new(),
            to_traverse: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Cap the total number of nodes ever traversed.
    pub fn with_max_traverse(mut self, max_traverse: Option<usize>) -> Self {
        self.max_traverse = max_traverse;
        self
    }

    /// Number of nodes that can still be selected.
    pub fn num_remaining(&self) -> usize {
        self.select_k.saturating_sub(self.selected.len())
    }

    pub fn selected(&self) -> &[Node] {
        &self.selected
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected_ids.contains(id)
    }

    pub fn is_visited(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Append nodes to the result in order, up to `select_k`.
    ///
    /// Returns the number of nodes actually added.
    pub fn select<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node>) -> usize {
        let mut added = 0;
        for node in nodes {
            if self.num_remaining() == 0 {
                break;
            }
            if self.selected_ids.insert(node.id.clone()) {
                self.selected.push(node.clone());
                added += 1;
            }
        }
        added
    }

    /// Mark nodes for adjacency expansion in the next round.
    ///
    /// Already-visited nodes, nodes at the depth limit and nodes beyond
    /// `max_traverse` are skipped. Returns the number of newly visited nodes.
    pub fn traverse<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node>) -> usize {
        let mut added = 0;
        for node in nodes {
            if self.visited.contains(&node.id) {
                continue;
            }
            if node.depth >= self.max_depth {
                log::trace!(
                    "Node {} at depth {} reached max depth {}, not traversing",
                    node.id,
                    node.depth,
                    self.max_depth
                );
                continue;
            }
            if self.max_traverse.is_some_and(|max| self.visited.len() >= max) {
                log::trace!("max_traverse reached, not traversing {}", node.id);
                continue;
            }
            self.visited.insert(node.id.clone());
            self.to_traverse.push(node.clone());
            added += 1;
        }
        added
    }

    /// Select and traverse the same nodes; returns the traverse count.
    pub fn select_and_traverse<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node> + Clone) -> usize {
        self.select(nodes.clone());
        self.traverse(nodes)
    }

    /// Drain the nodes marked for expansion this round.
    pub(crate) fn take_traverse(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.to_traverse)
    }

    pub(crate) fn visited_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.visited.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn into_selected(self) -> Vec<Node> {
        self.selected
    }
}
