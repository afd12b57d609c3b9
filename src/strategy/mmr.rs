//! Maximal Marginal Relevance strategy.
//!
//! Every discovered node joins a candidate pool carrying its relevance to the
//! query and its redundancy (maximum similarity to any selected node). Each
//! round the single best admissible candidate is selected and expanded, and
//! the redundancy of the rest is refreshed against it. Greedy: the result is
//! not a globally optimal diverse set.

use serde_json::json;

use super::Strategy;
use crate::math::{cosine_similarity, rank_order};
use crate::node::Node;
use crate::tracker::NodeTracker;

#[derive(Debug)]
struct Candidate {
    node: Node,
    relevance: f32,
    redundancy: f32,
}

impl Candidate {
    fn score(&self, lambda_mult: f32) -> f32 {
        lambda_mult * self.relevance - (1.0 - lambda_mult) * self.redundancy
    }
}

/// MMR selection: `λ · relevance − (1 − λ) · redundancy`.
#[derive(Debug)]
pub struct Mmr {
    lambda_mult: f32,
    min_mmr_score: f32,
    query_embedding: Option<Vec<f32>>,
    candidates: Vec<Candidate>,
}

impl Mmr {
    /// `lambda_mult = 1.0` ranks purely by relevance, `0.0` purely by
    /// diversity.
    pub fn new(lambda_mult: f32, min_mmr_score: f32, query_embedding: Option<Vec<f32>>) -> Self {
        Self {
            lambda_mult,
            min_mmr_score,
            query_embedding,
            candidates: Vec::new(),
        }
    }

    fn similarity(a: &Node, b: &Node) -> f32 {
        match (&a.embedding, &b.embedding) {
            (Some(x), Some(y)) => cosine_similarity(x, y),
            _ => 0.0,
        }
    }

    fn add_candidates(&mut self, nodes: &[Node], tracker: &NodeTracker) {
        for node in nodes {
            if tracker.is_selected(&node.id) || self.candidates.iter().any(|c| c.node.id == node.id) {
                continue;
            }
            let relevance = match (&self.query_embedding, &node.embedding) {
                (Some(_), None) | (None, _) => node.similarity_score,
                (Some(q), Some(e)) => cosine_similarity(q, e),
            };
            let redundancy = tracker
                .selected()
                .iter()
                .map(|s| Self::similarity(node, s))
                .fold(0.0_f32, f32::max);
            self.candidates.push(Candidate {
                node: node.clone(),
                relevance,
                redundancy,
            });
        }
    }

    /// Remove and return the best admissible candidate, dropping dead ones.
    ///
    /// Redundancy never decreases, so a candidate below `min_mmr_score` can
    /// never become admissible again.
    fn take_best(&mut self) -> Option<Candidate> {
        let lambda = self.lambda_mult;
        let min_score = self.min_mmr_score;
        self.candidates.retain(|c| c.score(lambda) >= min_score);

        let best = self
            .candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| rank_order(a.score(lambda), &a.node.id, b.score(lambda), &b.node.id))
            .map(|(i, _)| i)?;
        Some(self.candidates.swap_remove(best))
    }
}

impl Strategy for Mmr {
    fn name(&self) -> &'static str {
        "mmr"
    }

    fn iteration(&mut self, nodes: &[Node], tracker: &mut NodeTracker) {
        self.add_candidates(nodes, tracker);
        if tracker.num_remaining() == 0 {
            return;
        }

        let Some(chosen) = self.take_best() else {
            return;
        };

        let mut node = chosen.node.clone();
        node.extra.insert("mmr_score".to_string(), json!(chosen.score(self.lambda_mult)));
        node.extra.insert("relevance".to_string(), json!(chosen.relevance));
        node.extra.insert("redundancy".to_string(), json!(chosen.redundancy));
        log::debug!(
            "MMR selected {} (score {:.4}, relevance {:.4}, redundancy {:.4})",
            node.id,
            chosen.score(self.lambda_mult),
            chosen.relevance,
            chosen.redundancy
        );

        for candidate in &mut self.candidates {
            let sim = Self::similarity(&candidate.node, &node);
            if sim > candidate.redundancy {
                candidate.redundancy = sim;
            }
        }

        tracker.select_and_traverse([&node]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::Edges;
    use crate::node::Content;

    fn node(id: &str, embedding: Vec<f32>, query: &[f32]) -> Node {
        Node::from_content(
            Content::new(id, "").with_embedding(embedding),
            0,
            Edges::default(),
            Some(query),
        )
    }

    fn run_to_completion(mmr: &mut Mmr, nodes: &[Node], tracker: &mut NodeTracker) {
        mmr.iteration(nodes, tracker);
        for _ in 0..nodes.len() {
            mmr.iteration(&[], tracker);
        }
    }

    fn selected_ids(tracker: &NodeTracker) -> Vec<&str> {
        tracker.selected().iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_one_selection_per_round() {
        let q = [1.0, 0.0];
        let nodes = vec![node("a", vec![1.0, 0.0], &q), node("b", vec![0.8, 0.6], &q)];
        let mut tracker = NodeTracker::new(5, 1);
        let mut mmr = Mmr::new(0.5, 0.0, Some(q.to_vec()));
        mmr.iteration(&nodes, &mut tracker);
        assert_eq!(selected_ids(&tracker), vec!["a"]);
        assert!(tracker.is_visited("a"));
        assert!(tracker.selected()[0].extra.contains_key("mmr_score"));
    }

    #[test]
    fn test_lambda_one_is_pure_relevance() {
        let q = [1.0, 0.0];
        let nodes = vec![
            node("low", vec![0.0, 1.0], &q),
            node("high", vec![1.0, 0.0], &q),
            node("dup", vec![1.0, 0.001], &q),
            node("mid", vec![0.7, 0.7], &q),
        ];
        let mut tracker = NodeTracker::new(10, 0);
        let mut mmr = Mmr::new(1.0, f32::NEG_INFINITY, Some(q.to_vec()));
        run_to_completion(&mut mmr, &nodes, &mut tracker);
        assert_eq!(selected_ids(&tracker), vec!["high", "dup", "mid", "low"]);
    }

    #[test]
    fn test_diversity_prefers_dissimilar_nodes() {
        let q = [1.0, 0.0, 0.0];
        let nodes = vec![
            node("a", vec![1.0, 0.0, 0.0], &q),
            node("a2", vec![0.99, 0.01, 0.0], &q),
            node("b", vec![0.6, 0.0, 0.8], &q),
        ];
        let mut tracker = NodeTracker::new(2, 0);
        let mut mmr = Mmr::new(0.3, f32::NEG_INFINITY, Some(q.to_vec()));
        run_to_completion(&mut mmr, &nodes, &mut tracker);
        assert_eq!(selected_ids(&tracker), vec!["a", "b"]);
    }

    #[test]
    fn test_min_mmr_score_excludes_candidates() {
        let q = [1.0, 0.0];
        let nodes = vec![node("good", vec![1.0, 0.0], &q), node("bad", vec![0.0, 1.0], &q)];
        let mut tracker = NodeTracker::new(10, 0);
        let mut mmr = Mmr::new(1.0, 0.5, Some(q.to_vec()));
        run_to_completion(&mut mmr, &nodes, &mut tracker);
        assert_eq!(selected_ids(&tracker), vec!["good"]);
    }

    #[test]
    fn test_ties_break_by_id() {
        let q = [1.0, 0.0];
        let nodes = vec![node("z", vec![1.0, 0.0], &q), node("m", vec![1.0, 0.0], &q)];
        let mut tracker = NodeTracker::new(1, 0);
        let mut mmr = Mmr::new(1.0, 0.0, Some(q.to_vec()));
        mmr.iteration(&nodes, &mut tracker);
        assert_eq!(selected_ids(&tracker), vec!["m"]);
    }

    #[test]
    fn test_stops_at_select_k() {
        let q = [1.0, 0.0];
        let nodes = vec![node("a", vec![1.0, 0.0], &q), node("b", vec![0.0, 1.0], &q)];
        let mut tracker = NodeTracker::new(1, 0);
        let mut mmr = Mmr::new(0.5, f32::NEG_INFINITY, Some(q.to_vec()));
        run_to_completion(&mut mmr, &nodes, &mut tracker);
        assert_eq!(tracker.selected().len(), 1);
    }
}
