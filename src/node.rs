//! Content returned by stores and the traversal-time `Node` built from it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edges::{Edge, Edges};
use crate::math::similarity_to;

/// Node metadata: a JSON object.
pub type Metadata = serde_json::Map<String, Value>;

/// A stored item as returned by a [`StoreAdapter`](crate::store::StoreAdapter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Unique identifier within the corpus
    pub id: String,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Arbitrary JSON metadata; edges are derived from it
    #[serde(default)]
    pub metadata: Metadata,
    /// Embedding vector, if the store has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Similarity to the query as computed by the store, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Content {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            embedding: None,
            score: None,
        }
    }

    /// Set a metadata field (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the embedding (builder style).
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Resolve a (possibly dot-addressed) metadata field to its scalar values.
///
/// A literal key containing dots wins over nested addressing. Arrays are
/// flattened at every step, so `authors.name` over
/// `{"authors": [{"name": "a"}, {"name": "b"}]}` yields `a` and `b`.
/// Missing fields and `null` yield nothing.
pub fn lookup_path<'a>(metadata: &'a Metadata, path: &str) -> Vec<&'a Value> {
    if let Some(value) = metadata.get(path) {
        let mut out = Vec::new();
        flatten_into(value, &mut out);
        return out;
    }

    let mut segments = path.split('.');
    let first = match segments.next().and_then(|s| metadata.get(s)) {
        Some(v) => v,
        None => return Vec::new(),
    };

    let mut current = vec![first];
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            descend(value, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }

    let mut out = Vec::new();
    for value in current {
        flatten_into(value, &mut out);
    }
    out
}

fn descend<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                descend(item, segment, out);
            }
        }
        _ => {}
    }
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

/// Exact-match metadata predicate applied to seeding and traversal.
///
/// Each entry must match: the field equals the value, or the field is a
/// list containing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(pub BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0.iter().all(|(field, expected)| {
            metadata.get(field) == Some(expected)
                || lookup_path(metadata, field).into_iter().any(|v| v == expected)
        })
    }
}

/// `true` when there is no filter or the filter matches.
pub fn passes(filter: Option<&MetadataFilter>, metadata: &Metadata) -> bool {
    filter.map_or(true, |f| f.matches(metadata))
}

/// A node during one traversal: content plus bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Round-trip distance from the seeds (0 for seeds)
    pub depth: usize,
    /// Similarity to the query embedding (0.0 when unknown)
    pub similarity_score: f32,
    /// Strategy-private scores
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub extra: Metadata,
    #[serde(skip)]
    pub incoming_edges: BTreeSet<Edge>,
    #[serde(skip)]
    pub outgoing_edges: BTreeSet<Edge>,
}

impl Node {
    /// Build a node discovered at `depth`, scoring it against the query.
    pub fn from_content(
        content: Content,
        depth: usize,
        edges: Edges,
        query_embedding: Option<&[f32]>,
    ) -> Self {
        let similarity_score = content
            .score
            .unwrap_or_else(|| similarity_to(query_embedding, content.embedding.as_deref()));
        Self {
            id: content.id,
            content: content.content,
            metadata: content.metadata,
            embedding: content.embedding,
            depth,
            similarity_score,
            extra: Metadata::new(),
            incoming_edges: edges.incoming,
            outgoing_edges: edges.outgoing,
        }
    }

    /// The stored view of this node, without traversal bookkeeping.
    pub fn to_content(&self) -> Content {
        Content {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            embedding: self.embedding.clone(),
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup_scalar_and_list() {
        let m = meta(json!({"topic": "x", "tags": ["a", "b"], "n": 3}));
        assert_eq!(lookup_path(&m, "topic"), vec![&json!("x")]);
        assert_eq!(lookup_path(&m, "tags"), vec![&json!("a"), &json!("b")]);
        assert_eq!(lookup_path(&m, "n"), vec![&json!(3)]);
    }

    #[test]
    fn test_lookup_missing_and_null() {
        let m = meta(json!({"cites": null}));
        assert!(lookup_path(&m, "cites").is_empty());
        assert!(lookup_path(&m, "absent").is_empty());
        assert!(lookup_path(&m, "absent.deeper").is_empty());
    }

    #[test]
    fn test_lookup_nested_and_dict_in_list() {
        let m = meta(json!({
            "source": {"doc": "d1"},
            "authors": [{"name": "ada"}, {"name": "bob"}, {"other": 1}],
        }));
        assert_eq!(lookup_path(&m, "source.doc"), vec![&json!("d1")]);
        assert_eq!(
            lookup_path(&m, "authors.name"),
            vec![&json!("ada"), &json!("bob")]
        );
    }

    #[test]
    fn test_lookup_literal_dotted_key_wins() {
        let m = meta(json!({"a.b": "literal", "a": {"b": "nested"}}));
        assert_eq!(lookup_path(&m, "a.b"), vec![&json!("literal")]);
    }

    #[test]
    fn test_filter_matches_scalar_and_membership() {
        let m = meta(json!({"kind": "paper", "tags": ["rust", "graphs"]}));
        assert!(MetadataFilter::new().matches(&m));
        assert!(MetadataFilter::new().with("kind", "paper").matches(&m));
        assert!(MetadataFilter::new().with("tags", "rust").matches(&m));
        assert!(!MetadataFilter::new().with("kind", "book").matches(&m));
        assert!(!MetadataFilter::new()
            .with("kind", "paper")
            .with("tags", "python")
            .matches(&m));
    }

    #[test]
    fn test_node_uses_store_score_when_present() {
        let mut content = Content::new("a", "text").with_embedding(vec![1.0, 0.0]);
        content.score = Some(0.25);
        let node = Node::from_content(content, 0, Edges::default(), Some(&[1.0, 0.0]));
        assert_eq!(node.similarity_score, 0.25);
    }

    #[test]
    fn test_node_computes_similarity_when_missing() {
        let content = Content::new("a", "text").with_embedding(vec![0.0, 2.0]);
        let node = Node::from_content(content, 2, Edges::default(), Some(&[0.0, 1.0]));
        assert!((node.similarity_score - 1.0).abs() < 1e-6);
        assert_eq!(node.depth, 2);
    }
}
