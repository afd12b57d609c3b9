//! Traversal orchestrator.
//!
//! Seeds from similarity search and/or explicit roots, then runs rounds:
//! the strategy evaluates the nodes discovered in the previous round, the
//! nodes it marked for traversal are expanded with one adjacency call, and
//! the neighbors found become the next round's input.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::edges::{EdgeRule, EdgeSpec};
use crate::error::{Result, RetrieverError};
use crate::math::rank_order;
use crate::node::{passes, Content, MetadataFilter, Node};
use crate::store::{AdjacencyRequest, StoreAdapter};
use crate::strategy::{Strategy, StrategyKind};
use crate::tracker::NodeTracker;

/// Per-invocation traversal settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraversalOptions {
    /// Traversable relationships; empty means no expansion
    pub edges: Vec<EdgeRule>,
    pub strategy: StrategyKind,
    /// Maximum nodes returned
    pub select_k: usize,
    /// Seeds taken from similarity search; 0 disables vector seeding
    pub start_k: usize,
    /// Explicit seed ids, added after the similarity seeds
    pub initial_roots: Vec<String>,
    /// Maximum neighbors expanded per source node per round
    pub adjacent_k: usize,
    /// Hops from the seeds; 0 is plain vector search
    pub max_depth: usize,
    /// MMR relevance/diversity trade-off in [0, 1]
    pub lambda_mult: f32,
    /// MMR minimum admissible combined score
    pub min_mmr_score: f32,
    /// Exact-match predicate applied to seeding and traversal
    pub metadata_filter: Option<MetadataFilter>,
    /// Cap on the number of nodes ever expanded
    pub max_traverse: Option<usize>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            strategy: StrategyKind::Eager,
            select_k: 10,
            start_k: 5,
            initial_roots: Vec::new(),
            adjacent_k: 5,
            max_depth: 1,
            lambda_mult: 0.5,
            min_mmr_score: 0.0,
            metadata_filter: None,
            max_traverse: None,
        }
    }
}

impl TraversalOptions {
    /// Reject settings that cannot produce a meaningful traversal.
    pub fn validate(&self) -> Result<()> {
        if !self.lambda_mult.is_finite() || !(0.0..=1.0).contains(&self.lambda_mult) {
            return Err(RetrieverError::Config(format!(
                "lambda_mult must be within [0, 1], got {}",
                self.lambda_mult
            )));
        }
        if !self.min_mmr_score.is_finite() {
            return Err(RetrieverError::Config(format!(
                "min_mmr_score must be finite, got {}",
                self.min_mmr_score
            )));
        }
        if let Some(root) = self.initial_roots.iter().find(|r| r.trim().is_empty()) {
            return Err(RetrieverError::Config(format!("invalid root id '{}'", root)));
        }
        EdgeSpec::Rules(self.edges.clone()).validate()
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared between a caller and running traversals.
///
/// Cancelling aborts the round loop at the next store call or round
/// boundary; nodes already selected are still returned.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of one traversal.
#[derive(Debug, Clone, Serialize)]
pub struct TraversalResult {
    /// Selected nodes in selection order
    pub nodes: Vec<Node>,
    /// Ids of every node whose edges were expanded, sorted
    pub visited_ids: Vec<String>,
    /// Strategy rounds executed
    pub rounds: usize,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
}

impl TraversalResult {
    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Await `fut` unless `token` fires first; `None` means cancelled.
async fn until_cancelled<T, F>(token: Option<&CancellationToken>, fut: F) -> Option<Result<T>>
where
    F: Future<Output = Result<T>>,
{
    match token {
        None => Some(fut.await),
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = fut => Some(result),
            }
        }
    }
}

/// One traversal invocation against a store.
///
/// ```ignore
/// let result = Traversal::new(&store, options)
///     .with_cancellation(token)
///     .run(Some(&query_embedding))
///     .await?;
/// ```
pub struct Traversal<'a> {
    store: &'a dyn StoreAdapter,
    options: TraversalOptions,
    edge_spec: Option<EdgeSpec>,
    strategy: Option<Box<dyn Strategy>>,
    cancel: Option<CancellationToken>,
}

impl<'a> Traversal<'a> {
    pub fn new(store: &'a dyn StoreAdapter, options: TraversalOptions) -> Self {
        Self {
            store,
            options,
            edge_spec: None,
            strategy: None,
            cancel: None,
        }
    }

    /// Use `spec` (e.g. a dynamic edge function) instead of `options.edges`.
    pub fn with_edge_spec(mut self, spec: EdgeSpec) -> Self {
        self.edge_spec = Some(spec);
        self
    }

    /// Use a custom strategy instead of `options.strategy`.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the traversal to completion, cancellation, or the first store
    /// error.
    pub async fn run(self, query_embedding: Option<&[f32]>) -> Result<TraversalResult> {
        let Traversal {
            store,
            options,
            edge_spec,
            strategy,
            cancel,
        } = self;

        options.validate()?;
        let edge_spec = match edge_spec {
            Some(spec) => {
                spec.validate()?;
                spec
            }
            None => EdgeSpec::Rules(options.edges.clone()),
        };
        let mut strategy = strategy.unwrap_or_else(|| options.strategy.build(&options, query_embedding));
        let filter = options.metadata_filter.as_ref();
        let token = cancel.as_ref();
        let start = Instant::now();

        let mut tracker =
            NodeTracker::new(options.select_k, options.max_depth).with_max_traverse(options.max_traverse);
        let mut discovered: HashSet<String> = HashSet::new();
        let mut rounds = 0;
        let mut cancelled = false;

        let seeds = match seed(store, &options, query_embedding, token).await {
            Some(result) => result?,
            None => {
                cancelled = true;
                Vec::new()
            }
        };

        let mut new_nodes: Vec<Node> = Vec::with_capacity(seeds.len());
        for content in seeds {
            if discovered.insert(content.id.clone()) {
                let edges = edge_spec.resolve(&content);
                new_nodes.push(Node::from_content(content, 0, edges, query_embedding));
            }
        }
        log::debug!(
            "Traversal ({}): {} seeds, select_k={}, max_depth={}",
            strategy.name(),
            new_nodes.len(),
            options.select_k,
            options.max_depth
        );

        while !cancelled && (rounds > 0 || !new_nodes.is_empty()) {
            rounds += 1;
            let selected_before = tracker.selected().len();
            strategy.iteration(&new_nodes, &mut tracker);
            let frontier = tracker.take_traverse();
            let newly_selected = tracker.selected().len() - selected_before;

            log::debug!(
                "Round {}: {} discovered, {} selected, {} to traverse",
                rounds,
                new_nodes.len(),
                newly_selected,
                frontier.len()
            );

            if tracker.num_remaining() == 0 || (frontier.is_empty() && newly_selected == 0) {
                break;
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                cancelled = true;
                break;
            }

            new_nodes = Vec::new();
            if frontier.iter().all(|n| n.outgoing_edges.is_empty()) || options.adjacent_k == 0 {
                continue;
            }

            let request = AdjacencyRequest {
                sources: &frontier,
                query_embedding,
                limit_per_source: options.adjacent_k,
                filter,
                exclude: &discovered,
            };
            let lookup_start = Instant::now();
            let found = match until_cancelled(token, store.adjacent(&request)).await {
                Some(result) => result?,
                None => {
                    cancelled = true;
                    break;
                }
            };
            log::debug!(
                "Adjacency for {} sources returned {} nodes in {:?}",
                frontier.len(),
                found.len(),
                lookup_start.elapsed()
            );

            new_nodes = discover(found, &frontier, &edge_spec, filter, query_embedding, &mut discovered);
        }

        let visited_ids = tracker.visited_ids();
        let mut nodes = strategy.finalize(tracker.into_selected());
        nodes.truncate(options.select_k);

        if cancelled {
            log::info!("Traversal cancelled after {} rounds with {} nodes", rounds, nodes.len());
        }
        log::debug!(
            "Traversal selected {} nodes, expanded {}, {} rounds, took {:?}",
            nodes.len(),
            visited_ids.len(),
            rounds,
            start.elapsed()
        );

        Ok(TraversalResult {
            nodes,
            visited_ids,
            rounds,
            cancelled,
        })
    }
}

/// Run a traversal with the configured strategy and edges.
pub async fn traverse(
    store: &dyn StoreAdapter,
    options: TraversalOptions,
    query_embedding: Option<&[f32]>,
) -> Result<TraversalResult> {
    Traversal::new(store, options).run(query_embedding).await
}

/// Similarity seeds in rank order followed by explicit roots in given order.
async fn seed(
    store: &dyn StoreAdapter,
    options: &TraversalOptions,
    query_embedding: Option<&[f32]>,
    token: Option<&CancellationToken>,
) -> Option<Result<Vec<Content>>> {
    let filter = options.metadata_filter.as_ref();
    let mut seeds = Vec::new();

    if options.start_k > 0 {
        match query_embedding {
            Some(query) => {
                match until_cancelled(token, store.search_similar(query, options.start_k, filter)).await? {
                    Ok(found) => seeds.extend(found),
                    Err(e) => return Some(Err(e)),
                }
            }
            None => log::debug!("No query embedding, skipping similarity seeding"),
        }
    }

    if !options.initial_roots.is_empty() {
        match until_cancelled(token, store.get_by_ids(&options.initial_roots)).await? {
            Ok(roots) => {
                if roots.len() < options.initial_roots.len() {
                    log::warn!(
                        "{} of {} root ids were not found",
                        options.initial_roots.len() - roots.len(),
                        options.initial_roots.len()
                    );
                }
                seeds.extend(roots.into_iter().filter(|c| passes(filter, &c.metadata)));
            }
            Err(e) => return Some(Err(e)),
        }
    }

    Some(Ok(seeds))
}

/// Turn adjacency results into next-round nodes.
///
/// A node's depth is one more than the shallowest frontier node with an edge
/// to it. Output is ordered by query similarity, then id.
fn discover(
    found: Vec<Content>,
    frontier: &[Node],
    edge_spec: &EdgeSpec,
    filter: Option<&MetadataFilter>,
    query_embedding: Option<&[f32]>,
    discovered: &mut HashSet<String>,
) -> Vec<Node> {
    let fallback_depth = frontier.iter().map(|n| n.depth).min().unwrap_or(0);
    let mut nodes = Vec::with_capacity(found.len());

    for content in found {
        if !passes(filter, &content.metadata) || !discovered.insert(content.id.clone()) {
            continue;
        }
        let depth = frontier
            .iter()
            .filter(|source| source.outgoing_edges.iter().any(|e| e.matches(&content)))
            .map(|source| source.depth)
            .min()
            .unwrap_or(fallback_depth)
            + 1;
        let edges = edge_spec.resolve(&content);
        nodes.push(Node::from_content(content, depth, edges, query_embedding));
    }

    nodes.sort_by(|a, b| rank_order(a.similarity_score, &a.id, b.similarity_score, &b.id));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::Edge;
    use crate::store::InMemoryStore;
    use crate::strategy::Scored;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn options(edges: &[(&str, &str)]) -> TraversalOptions {
        TraversalOptions {
            edges: edges
                .iter()
                .map(|(s, t)| EdgeRule::new(s, t).unwrap())
                .collect(),
            ..TraversalOptions::default()
        }
    }

    fn citations() -> InMemoryStore {
        InMemoryStore::from_contents(vec![
            Content::new("A", "root")
                .with_metadata("cites", json!(["B"]))
                .with_embedding(vec![1.0, 0.0]),
            Content::new("B", "cited")
                .with_metadata("cites", json!([]))
                .with_embedding(vec![0.9, 0.1]),
            Content::new("C", "unrelated").with_embedding(vec![0.8, 0.2]),
        ])
    }

    fn topics() -> InMemoryStore {
        InMemoryStore::from_contents(vec![
            Content::new("P", "p").with_metadata("topic", "x").with_embedding(vec![1.0, 0.0]),
            Content::new("Q", "q").with_metadata("topic", "x").with_embedding(vec![0.0, 1.0]),
            Content::new("R", "r").with_metadata("topic", "x").with_embedding(vec![0.6, 0.8]),
            Content::new("S", "s").with_metadata("topic", "y").with_embedding(vec![0.99, 0.1]),
        ])
    }

    /// Ring of `n` nodes, each citing the next, embeddings spread on a circle.
    fn ring(n: usize) -> InMemoryStore {
        InMemoryStore::from_contents((0..n).map(|i| {
            let angle = i as f32 / n as f32 * std::f32::consts::PI;
            Content::new(format!("n{:02}", i), "")
                .with_metadata("next", format!("n{:02}", (i + 1) % n))
                .with_metadata("group", "g")
                .with_embedding(vec![angle.cos(), angle.sin()])
        }))
    }

    #[tokio::test]
    async fn test_citation_scenario() {
        let store = citations();
        let opts = TraversalOptions {
            start_k: 0,
            initial_roots: vec!["A".to_string()],
            max_depth: 2,
            ..options(&[("cites", "$id")])
        };
        let result = traverse(&store, opts, None).await.unwrap();
        assert_eq!(result.ids(), vec!["A", "B"]);
        assert_eq!(result.nodes[1].depth, 1);
        assert_eq!(result.visited_ids, vec!["A", "B"]);
        // B has no outgoing edges, so only A's expansion hits the store
        assert_eq!(store.adjacent_calls(), 1);
    }

    #[tokio::test]
    async fn test_shared_topic_scenario() {
        let store = topics();
        let opts = TraversalOptions {
            start_k: 1,
            max_depth: 1,
            ..options(&[("topic", "topic")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        // Seed first, then neighbors by similarity
        assert_eq!(result.ids(), vec!["P", "R", "Q"]);
        assert_eq!(result.visited_ids, vec!["P"]);
    }

    #[tokio::test]
    async fn test_max_depth_zero_is_plain_search() {
        let store = topics();
        let opts = TraversalOptions {
            start_k: 3,
            select_k: 2,
            max_depth: 0,
            ..options(&[("topic", "topic")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        let plain: Vec<String> = store
            .search_similar(&[1.0, 0.0], 2, None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(result.ids(), plain);
        assert_eq!(store.adjacent_calls(), 0);
        assert!(result.visited_ids.is_empty());
    }

    #[tokio::test]
    async fn test_cycles_terminate_and_visit_once() {
        let store = ring(6);
        let opts = TraversalOptions {
            start_k: 1,
            max_depth: 50,
            select_k: 100,
            ..options(&[("next", "$id")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(result.nodes.len(), 6);
        assert_eq!(result.visited_ids.len(), 6);
        let unique: HashSet<_> = result.ids().into_iter().collect();
        assert_eq!(unique.len(), 6);
        let depths: Vec<usize> = result.nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_result_never_exceeds_select_k() {
        for strategy in [StrategyKind::Eager, StrategyKind::Mmr] {
            for select_k in 0..8 {
                let store = ring(7);
                let opts = TraversalOptions {
                    strategy,
                    select_k,
                    start_k: 3,
                    max_depth: 3,
                    ..options(&[("group", "group")])
                };
                let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
                assert!(result.nodes.len() <= select_k, "{:?} select_k={}", strategy, select_k);
            }
        }
    }

    #[tokio::test]
    async fn test_eager_adjacent_k_truncates_per_hop() {
        let store = InMemoryStore::from_contents(vec![
            Content::new("A", "")
                .with_metadata("cites", json!(["B", "C", "D"]))
                .with_embedding(vec![1.0, 0.0]),
            Content::new("B", "").with_embedding(vec![0.0, 1.0]),
            Content::new("C", "").with_embedding(vec![0.9, 0.1]),
            Content::new("D", "").with_embedding(vec![0.7, 0.7]),
        ]);
        let opts = TraversalOptions {
            start_k: 0,
            initial_roots: vec!["A".to_string()],
            adjacent_k: 2,
            max_depth: 3,
            ..options(&[("cites", "$id")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(result.ids(), vec!["A", "C", "D"]);
    }

    #[tokio::test]
    async fn test_traversal_is_deterministic() {
        let store = ring(9);
        let opts = TraversalOptions {
            strategy: StrategyKind::Mmr,
            start_k: 2,
            max_depth: 4,
            select_k: 6,
            ..options(&[("next", "$id"), ("group", "group")])
        };
        let first = traverse(&store, opts.clone(), Some(&[0.0, 1.0])).await.unwrap();
        let second = traverse(&store, opts, Some(&[0.0, 1.0])).await.unwrap();
        assert_eq!(first.ids(), second.ids());
        assert_eq!(first.visited_ids, second.visited_ids);
    }

    #[tokio::test]
    async fn test_mmr_lambda_one_is_relevance_order() {
        let store = topics();
        let opts = TraversalOptions {
            strategy: StrategyKind::Mmr,
            lambda_mult: 1.0,
            start_k: 4,
            select_k: 4,
            max_depth: 0,
            ..TraversalOptions::default()
        };
        let query = [0.8, 0.6];
        let result = traverse(&store, opts, Some(&query)).await.unwrap();
        let by_relevance: Vec<String> = store
            .search_similar(&query, 4, None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(result.ids(), by_relevance);
    }

    #[tokio::test]
    async fn test_mmr_min_score_excludes_candidates() {
        let store = topics();
        let opts = TraversalOptions {
            strategy: StrategyKind::Mmr,
            lambda_mult: 1.0,
            min_mmr_score: 0.5,
            start_k: 4,
            select_k: 4,
            max_depth: 0,
            ..TraversalOptions::default()
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        // Q is orthogonal to the query
        assert!(!result.ids().contains(&"Q"));
        for node in &result.nodes {
            assert!(node.extra["mmr_score"].as_f64().unwrap() >= 0.5);
        }
    }

    #[tokio::test]
    async fn test_mmr_expands_selected_nodes() {
        let store = citations();
        let opts = TraversalOptions {
            strategy: StrategyKind::Mmr,
            start_k: 1,
            max_depth: 2,
            ..options(&[("cites", "$id")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(result.ids(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_empty_seed_set_returns_empty() {
        let store = topics();
        let result = traverse(&store, options(&[("topic", "topic")]), None).await.unwrap();
        assert!(result.nodes.is_empty());
        assert_eq!(result.rounds, 0);
        assert_eq!(store.adjacent_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_roots_are_skipped() {
        let store = citations();
        let opts = TraversalOptions {
            start_k: 0,
            initial_roots: vec!["missing".to_string()],
            ..options(&[("cites", "$id")])
        };
        let result = traverse(&store, opts, None).await.unwrap();
        assert!(result.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_store_calls() {
        let store = topics();
        let opts = TraversalOptions {
            lambda_mult: 1.5,
            ..TraversalOptions::default()
        };
        let err = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, RetrieverError::Config(_)));
        assert_eq!(store.search_calls(), 0);

        let opts = TraversalOptions {
            edges: vec![EdgeRule::same("topic").unwrap(), EdgeRule::same("topic").unwrap()],
            ..TraversalOptions::default()
        };
        assert!(traverse(&store, opts, Some(&[1.0, 0.0])).await.is_err());
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_metadata_filter_restricts_traversal() {
        let store = InMemoryStore::from_contents(vec![
            Content::new("A", "")
                .with_metadata("kind", "paper")
                .with_metadata("cites", json!(["B", "C"]))
                .with_embedding(vec![1.0, 0.0]),
            Content::new("B", "").with_metadata("kind", "paper"),
            Content::new("C", "").with_metadata("kind", "note"),
        ]);
        let opts = TraversalOptions {
            metadata_filter: Some(MetadataFilter::new().with("kind", "paper")),
            ..options(&[("cites", "$id")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(result.ids(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_dynamic_edge_spec() {
        let store = topics();
        // P links only to R, by id
        let spec = EdgeSpec::dynamic(|content: &Content| {
            let mut edges = crate::edges::Edges::default();
            edges.incoming.insert(Edge::Id(content.id.clone()));
            if content.id == "P" {
                edges.outgoing.insert(Edge::Id("R".to_string()));
            }
            edges
        });
        let opts = TraversalOptions {
            start_k: 1,
            ..TraversalOptions::default()
        };
        let result = Traversal::new(&store, opts)
            .with_edge_spec(spec)
            .run(Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(result.ids(), vec!["P", "R"]);
    }

    #[tokio::test]
    async fn test_custom_strategy() {
        let store = topics();
        let opts = TraversalOptions {
            start_k: 1,
            max_depth: 2,
            ..options(&[("topic", "topic")])
        };
        // Prefer nodes whose content sorts last
        let scored = Scored::new(|node: &Node| node.content.as_bytes()[0] as f32, 1);
        let result = Traversal::new(&store, opts)
            .with_strategy(Box::new(scored))
            .run(Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(result.ids(), vec!["P", "R", "Q"]);
    }

    #[tokio::test]
    async fn test_max_traverse_caps_expansion() {
        let store = ring(8);
        let opts = TraversalOptions {
            start_k: 1,
            max_depth: 10,
            max_traverse: Some(3),
            ..options(&[("next", "$id")])
        };
        let result = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(result.visited_ids.len(), 3);
        assert_eq!(result.nodes.len(), 4);
    }

    /// Delegates to an in-memory store but never answers adjacency.
    struct Stalled(InMemoryStore);

    #[async_trait]
    impl StoreAdapter for Stalled {
        async fn search_similar(
            &self,
            query_embedding: &[f32],
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<Content>> {
            self.0.search_similar(query_embedding, k, filter).await
        }

        async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>> {
            self.0.get_by_ids(ids).await
        }

        async fn search_edge(
            &self,
            edge: &Edge,
            query_embedding: Option<&[f32]>,
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<Content>> {
            self.0.search_edge(edge, query_embedding, k, filter).await
        }

        async fn adjacent(&self, _request: &AdjacencyRequest<'_>) -> Result<Vec<Content>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_results() {
        let store = Stalled(topics());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let opts = TraversalOptions {
            start_k: 1,
            ..options(&[("topic", "topic")])
        };
        let result = Traversal::new(&store, opts)
            .with_cancellation(token)
            .run(Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.ids(), vec!["P"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = topics();
        let token = CancellationToken::new();
        token.cancel();
        let result = Traversal::new(&store, options(&[("topic", "topic")]))
            .with_cancellation(token)
            .run(Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(result.nodes.is_empty());
    }

    /// Fails every adjacency lookup with a permanent error.
    struct Broken(InMemoryStore);

    #[async_trait]
    impl StoreAdapter for Broken {
        async fn search_similar(
            &self,
            query_embedding: &[f32],
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<Content>> {
            self.0.search_similar(query_embedding, k, filter).await
        }

        async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>> {
            self.0.get_by_ids(ids).await
        }

        async fn search_edge(
            &self,
            _edge: &Edge,
            _query_embedding: Option<&[f32]>,
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<Content>> {
            Err(RetrieverError::InvalidInput("backend rejected query".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_error_aborts_traversal() {
        let store = Broken(topics());
        let opts = TraversalOptions {
            start_k: 1,
            ..options(&[("topic", "topic")])
        };
        let err = traverse(&store, opts, Some(&[1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, RetrieverError::InvalidInput(_)));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: TraversalOptions = toml::from_str(
            r#"
            edges = ["topic", ["cites", "$id"]]
            strategy = "mmr"
            select_k = 3
            "#,
        )
        .unwrap();
        assert_eq!(opts.edges.len(), 2);
        assert_eq!(opts.strategy, StrategyKind::Mmr);
        assert_eq!(opts.select_k, 3);
        assert_eq!(opts.start_k, 5);
        assert_eq!(opts.max_depth, 1);
        assert!(opts.validate().is_ok());
    }
}
