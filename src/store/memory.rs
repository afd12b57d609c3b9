//! Brute-force in-memory store.
//!
//! Scores every stored embedding against the query and answers a whole
//! adjacency batch in a single pass over the corpus. Deterministic, so it
//! doubles as the reference adapter in tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{rank_and_truncate, AdjacencyRequest, StoreAdapter};
use crate::edges::Edge;
use crate::error::Result;
use crate::math::{cosine_similarity, rank_order};
use crate::node::{passes, Content, MetadataFilter};

/// Thread-safe in-memory store keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    contents: RwLock<BTreeMap<String, Content>>,
    search_calls: AtomicUsize,
    adjacent_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contents(contents: impl IntoIterator<Item = Content>) -> Self {
        let store = Self::new();
        store.add_contents(contents);
        store
    }

    /// Insert or replace contents by id.
    pub fn add_contents(&self, contents: impl IntoIterator<Item = Content>) {
        let mut guard = self.contents.write().unwrap_or_else(|e| e.into_inner());
        for content in contents {
            guard.insert(content.id.clone(), content);
        }
    }

    pub fn len(&self) -> usize {
        self.contents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `search_similar` calls served.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }

    /// Number of `adjacent` batches served.
    pub fn adjacent_calls(&self) -> usize {
        self.adjacent_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        let guard = self.contents.read().unwrap_or_else(|e| e.into_inner());

        let mut scored: Vec<(f32, &Content)> = guard
            .values()
            .filter(|c| passes(filter, &c.metadata))
            .filter_map(|c| {
                c.embedding
                    .as_deref()
                    .map(|e| (cosine_similarity(query_embedding, e), c))
            })
            .collect();
        scored.sort_by(|a, b| rank_order(a.0, &a.1.id, b.0, &b.1.id));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, c)| {
                let mut content = c.clone();
                content.score = Some(score);
                content
            })
            .collect())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>> {
        let guard = self.contents.read().unwrap_or_else(|e| e.into_inner());
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn search_edge(
        &self,
        edge: &Edge,
        query_embedding: Option<&[f32]>,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        let guard = self.contents.read().unwrap_or_else(|e| e.into_inner());
        let matches: Vec<Content> = guard
            .values()
            .filter(|c| passes(filter, &c.metadata) && edge.matches(c))
            .cloned()
            .collect();
        Ok(rank_and_truncate(matches, query_embedding, k))
    }

    async fn adjacent(&self, request: &AdjacencyRequest<'_>) -> Result<Vec<Content>> {
        self.adjacent_calls.fetch_add(1, Ordering::Relaxed);
        if request.limit_per_source == 0 {
            return Ok(Vec::new());
        }
        let guard = self.contents.read().unwrap_or_else(|e| e.into_inner());

        let mut per_source: Vec<Vec<Content>> = vec![Vec::new(); request.sources.len()];
        for content in guard.values() {
            if request.exclude.contains(&content.id) || !passes(request.filter, &content.metadata) {
                continue;
            }
            for (i, source) in request.sources.iter().enumerate() {
                if source.id != content.id && source.outgoing_edges.iter().any(|e| e.matches(content)) {
                    per_source[i].push(content.clone());
                }
            }
        }

        let mut emitted = HashSet::new();
        let mut out = Vec::new();
        for candidates in per_source {
            for content in rank_and_truncate(candidates, request.query_embedding, request.limit_per_source) {
                if emitted.insert(content.id.clone()) {
                    out.push(content);
                }
            }
        }
        Ok(out)
    }
}
