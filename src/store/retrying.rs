use async_trait::async_trait;

use super::{AdjacencyRequest, StoreAdapter};
use crate::edges::Edge;
use crate::error::Result;
use crate::node::{Content, MetadataFilter};
use crate::retry::RetryPolicy;

/// Wraps another adapter and retries transient failures with backoff.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: StoreAdapter> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<S: StoreAdapter> StoreAdapter for RetryingStore<S> {
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        self.policy
            .run("search_similar", || self.inner.search_similar(query_embedding, k, filter))
            .await
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>> {
        self.policy.run("get_by_ids", || self.inner.get_by_ids(ids)).await
    }

    async fn search_edge(
        &self,
        edge: &Edge,
        query_embedding: Option<&[f32]>,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        self.policy
            .run("search_edge", || self.inner.search_edge(edge, query_embedding, k, filter))
            .await
    }

    async fn adjacent(&self, request: &AdjacencyRequest<'_>) -> Result<Vec<Content>> {
        self.policy.run("adjacent", || self.inner.adjacent(request)).await
    }
}
