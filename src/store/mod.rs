//! Store adapters: the only boundary between traversal and a backend.
//!
//! An adapter answers three kinds of lookups: vector similarity search,
//! direct lookup by id, and adjacency (nodes reached by a set of outgoing
//! edges). Adapters that can answer adjacency for a whole batch in one query
//! override [`StoreAdapter::adjacent`]; the rest inherit a per-edge fallback
//! built on [`StoreAdapter::search_edge`].

mod memory;
mod retrying;
mod sqlite;

pub use memory::InMemoryStore;
pub use retrying::RetryingStore;
pub use sqlite::SqliteStore;

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::edges::Edge;
use crate::error::Result;
use crate::math::{rank_order, similarity_to};
use crate::node::{Content, MetadataFilter, Node};

/// One round's adjacency lookup.
#[derive(Debug, Clone, Copy)]
pub struct AdjacencyRequest<'a> {
    /// Nodes being expanded, in frontier order, with their outgoing edges
    pub sources: &'a [Node],
    /// Used to rank candidates when a source has more than the limit
    pub query_embedding: Option<&'a [f32]>,
    /// Maximum neighbors returned per source
    pub limit_per_source: usize,
    pub filter: Option<&'a MetadataFilter>,
    /// Ids that must not be returned (already discovered)
    pub exclude: &'a HashSet<String>,
}

/// Backend access used by the traversal. Must be safe for concurrent use.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Top-`k` contents by similarity to `query_embedding`, best first, with
    /// `score` set.
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>>;

    /// Contents for `ids`, in request order; unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>>;

    /// Up to `k` contents that are targets of `edge`, most similar to the
    /// query first (id order without a query).
    async fn search_edge(
        &self,
        edge: &Edge,
        query_embedding: Option<&[f32]>,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>>;

    /// Neighbors of every source, at most `limit_per_source` each, excluding
    /// `request.exclude`. Result order is unspecified.
    async fn adjacent(&self, request: &AdjacencyRequest<'_>) -> Result<Vec<Content>> {
        adjacent_per_edge(self, request).await
    }
}

/// Rank score of a candidate: the store's score or similarity to the query.
pub(crate) fn relevance(content: &Content, query_embedding: Option<&[f32]>) -> f32 {
    content
        .score
        .unwrap_or_else(|| similarity_to(query_embedding, content.embedding.as_deref()))
}

/// Sort best first (relevance, then id) and keep `limit`.
pub(crate) fn rank_and_truncate(
    mut candidates: Vec<Content>,
    query_embedding: Option<&[f32]>,
    limit: usize,
) -> Vec<Content> {
    candidates.sort_by(|a, b| {
        rank_order(
            relevance(a, query_embedding),
            &a.id,
            relevance(b, query_embedding),
            &b.id,
        )
    });
    candidates.truncate(limit);
    candidates
}

/// Per-edge fallback for [`StoreAdapter::adjacent`].
///
/// Each distinct outgoing edge in the batch is queried once, concurrently.
/// A source's candidates over all of its edges are merged, ranked by
/// relevance then id, and truncated to the per-source limit.
pub async fn adjacent_per_edge<S>(store: &S, request: &AdjacencyRequest<'_>) -> Result<Vec<Content>>
where
    S: StoreAdapter + ?Sized,
{
    let edges: BTreeSet<&Edge> = request
        .sources
        .iter()
        .flat_map(|source| source.outgoing_edges.iter())
        .collect();
    if edges.is_empty() || request.limit_per_source == 0 {
        return Ok(Vec::new());
    }

    // Over-fetch so that excluded ids cannot starve a source.
    let fetch_k = request.limit_per_source + request.exclude.len();
    let lookups = edges.iter().map(|edge| async move {
        let found = store
            .search_edge(edge, request.query_embedding, fetch_k, request.filter)
            .await?;
        Ok::<_, crate::RetrieverError>((*edge, found))
    });
    let by_edge: HashMap<&Edge, Vec<Content>> = try_join_all(lookups).await?.into_iter().collect();
    log::debug!(
        "Per-edge adjacency: {} sources, {} edge queries",
        request.sources.len(),
        by_edge.len()
    );

    let mut emitted = HashSet::new();
    let mut out = Vec::new();
    for source in request.sources {
        let mut seen = HashSet::new();
        let candidates: Vec<Content> = source
            .outgoing_edges
            .iter()
            .filter_map(|edge| by_edge.get(edge))
            .flatten()
            .filter(|c| c.id != source.id && !request.exclude.contains(&c.id))
            .filter(|c| seen.insert(c.id.clone()))
            .cloned()
            .collect();
        for content in rank_and_truncate(candidates, request.query_embedding, request.limit_per_source) {
            if emitted.insert(content.id.clone()) {
                out.push(content);
            }
        }
    }
    Ok(out)
}
