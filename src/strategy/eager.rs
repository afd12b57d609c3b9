use super::Strategy;
use crate::node::Node;
use crate::tracker::NodeTracker;

/// Breadth-first strategy: selects and expands every discovered node.
///
/// Bounded only by `adjacent_k`, `max_depth` and `select_k`. Selection order
/// is discovery order.
#[derive(Debug, Default)]
pub struct Eager;

impl Eager {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Eager {
    fn name(&self) -> &'static str {
        "eager"
    }

    fn iteration(&mut self, nodes: &[Node], tracker: &mut NodeTracker) {
        tracker.select_and_traverse(nodes);
    }
}
