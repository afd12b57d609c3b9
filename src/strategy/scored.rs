use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::Strategy;
use crate::math::rank_order;
use crate::node::Node;
use crate::tracker::NodeTracker;

/// User scoring function; higher is better.
pub type Scorer = Arc<dyn Fn(&Node) -> f32 + Send + Sync>;

struct ScoredNode {
    score: f32,
    node: Node,
}

// Max-heap order: the better node compares greater.
impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(other.score, &other.node.id, self.score, &self.node.id)
    }
}

impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredNode {}

/// Selects the best-scoring pending nodes, `per_iteration_limit` per round.
///
/// Nodes not chosen in the round they were discovered stay queued for later
/// rounds.
pub struct Scored {
    scorer: Scorer,
    per_iteration_limit: usize,
    queue: BinaryHeap<ScoredNode>,
}

impl Scored {
    pub fn new<F>(scorer: F, per_iteration_limit: usize) -> Self
    where
        F: Fn(&Node) -> f32 + Send + Sync + 'static,
    {
        Self {
            scorer: Arc::new(scorer),
            per_iteration_limit: per_iteration_limit.max(1),
            queue: BinaryHeap::new(),
        }
    }
}

impl Strategy for Scored {
    fn name(&self) -> &'static str {
        "scored"
    }

    fn iteration(&mut self, nodes: &[Node], tracker: &mut NodeTracker) {
        for node in nodes {
            let score = (self.scorer)(node);
            self.queue.push(ScoredNode {
                score,
                node: node.clone(),
            });
        }

        let mut chosen = Vec::with_capacity(self.per_iteration_limit);
        while chosen.len() < self.per_iteration_limit {
            match self.queue.pop() {
                Some(entry) if tracker.is_selected(&entry.node.id) => continue,
                Some(entry) => chosen.push(entry.node),
                None => break,
            }
        }
        tracker.select_and_traverse(&chosen);
    }
}
