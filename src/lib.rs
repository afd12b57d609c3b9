//! Graph-traversal retrieval: vector-similarity seeding plus bounded
//! traversal over edges derived from node metadata.

pub mod config;
pub mod db;
pub mod edges;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod math;
pub mod node;
pub mod retry;
pub mod store;
pub mod strategy;
pub mod tracker;
pub mod traversal;

pub use config::Config;
pub use edges::{Edge, EdgeRule, EdgeSpec, Edges};
pub use error::{Result, RetrieverError};
pub use graph::{Community, DocumentGraph};
pub use node::{Content, MetadataFilter, Node};
pub use retry::RetryPolicy;
pub use store::{InMemoryStore, RetryingStore, SqliteStore, StoreAdapter};
pub use strategy::{Strategy, StrategyKind};
pub use traversal::{traverse, CancellationToken, Traversal, TraversalOptions, TraversalResult};
