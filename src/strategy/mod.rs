//! Traversal strategies: decide per round which discovered nodes to expand
//! and which to keep.
//!
//! The orchestrator calls [`Strategy::iteration`] once per round with exactly
//! the nodes discovered in that round. Strategies record decisions through
//! the [`NodeTracker`].

mod eager;
mod mmr;
mod scored;

pub use eager::Eager;
pub use mmr::Mmr;
pub use scored::{Scored, Scorer};

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::tracker::NodeTracker;
use crate::traversal::TraversalOptions;

/// Selection/expansion policy for one traversal.
///
/// A strategy instance holds per-invocation state and must not be reused.
pub trait Strategy: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Process the nodes newly discovered this round. May be called with an
    /// empty slice when the previous round discovered nothing new.
    fn iteration(&mut self, nodes: &[Node], tracker: &mut NodeTracker);

    /// Post-process the selected nodes before they are returned.
    fn finalize(&self, selected: Vec<Node>) -> Vec<Node> {
        selected
    }
}

/// Built-in strategies selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Eager,
    Mmr,
}

impl StrategyKind {
    /// Instantiate fresh strategy state for one invocation.
    pub fn build(self, options: &TraversalOptions, query_embedding: Option<&[f32]>) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Eager => Box::new(Eager::new()),
            StrategyKind::Mmr => Box::new(Mmr::new(
                options.lambda_mult,
                options.min_mmr_score,
                query_embedding.map(<[f32]>::to_vec),
            )),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = crate::RetrieverError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eager" => Ok(StrategyKind::Eager),
            "mmr" => Ok(StrategyKind::Mmr),
            other => Err(crate::RetrieverError::Config(format!(
                "unknown strategy '{}' (expected 'eager' or 'mmr')",
                other
            ))),
        }
    }
}
