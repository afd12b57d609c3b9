//! Edge rules: directional metadata field pairs that define which nodes are
//! adjacent, and the resolver turning them into per-node edge sets.
//!
//! A rule `(source, target)` links node A to node B when a value of A's
//! `source` field equals a value of B's `target` field. The reserved marker
//! [`ID_MARKER`] stands for the node's own id.

mod resolver;

pub use resolver::{EdgeFunction, EdgeSpec};

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{lookup_path, Content};
use crate::{Result, RetrieverError};

/// Reserved field name resolving to the node id.
pub const ID_MARKER: &str = "$id";

/// One side of an edge rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// The node's own id
    Id,
    /// A metadata field, possibly dot-addressed
    Field(String),
}

impl FieldRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == ID_MARKER {
            return Ok(FieldRef::Id);
        }
        if raw.is_empty() {
            return Err(RetrieverError::Config("edge field name is empty".to_string()));
        }
        if raw.starts_with('$') {
            return Err(RetrieverError::Config(format!(
                "unknown reserved field '{}' (only '{}' is supported)",
                raw, ID_MARKER
            )));
        }
        if raw.split('.').any(|segment| segment.trim().is_empty()) {
            return Err(RetrieverError::Config(format!(
                "malformed field path '{}'",
                raw
            )));
        }
        Ok(FieldRef::Field(raw.to_string()))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Id => f.write_str(ID_MARKER),
            FieldRef::Field(path) => f.write_str(path),
        }
    }
}

/// A directional rule: `source` values of one node point at nodes with the
/// same `target` value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "EdgeRuleDef")]
pub struct EdgeRule {
    pub source: FieldRef,
    pub target: FieldRef,
}

impl EdgeRule {
    pub fn new(source: &str, target: &str) -> Result<Self> {
        Ok(Self {
            source: FieldRef::parse(source)?,
            target: FieldRef::parse(target)?,
        })
    }

    /// Shared-attribute rule: `(field, field)`.
    pub fn same(field: &str) -> Result<Self> {
        Self::new(field, field)
    }
}

impl fmt::Display for EdgeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Configuration form: `"topic"` or `["cites", "$id"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EdgeRuleDef {
    Same(String),
    Pair(String, String),
}

impl TryFrom<EdgeRuleDef> for EdgeRule {
    type Error = RetrieverError;

    fn try_from(def: EdgeRuleDef) -> Result<Self> {
        match def {
            EdgeRuleDef::Same(field) => EdgeRule::same(&field),
            EdgeRuleDef::Pair(source, target) => EdgeRule::new(&source, &target),
        }
    }
}

/// A scalar metadata value usable as an edge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EdgeValue {
    Bool(bool),
    /// Numbers compare by their JSON text
    Number(String),
    Text(String),
}

impl EdgeValue {
    /// Convert a scalar JSON value; objects, arrays and null are not keys.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(EdgeValue::Bool(*b)),
            Value::Number(n) => Some(EdgeValue::Number(n.to_string())),
            Value::String(s) => Some(EdgeValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            EdgeValue::Bool(b) => Value::Bool(*b),
            EdgeValue::Number(n) => {
                serde_json::from_str(n).unwrap_or_else(|_| Value::String(n.clone()))
            }
            EdgeValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Whether a metadata value equals this key.
    pub fn matches(&self, value: &Value) -> bool {
        EdgeValue::from_json(value).as_ref() == Some(self)
    }

    /// Text form used when the value must equal a node id.
    fn as_id(&self) -> Option<&str> {
        match self {
            EdgeValue::Text(s) | EdgeValue::Number(s) => Some(s),
            EdgeValue::Bool(_) => None,
        }
    }
}

/// What a target node must carry to be reached by an outgoing edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Edge {
    /// Node with this id
    Id(String),
    /// Node whose `field` has (or contains) `value`
    Metadata { field: String, value: EdgeValue },
}

impl Edge {
    pub fn metadata(field: impl Into<String>, value: impl Into<Value>) -> Option<Self> {
        EdgeValue::from_json(&value.into()).map(|value| Edge::Metadata {
            field: field.into(),
            value,
        })
    }

    /// Whether `content` is a target of this edge.
    pub fn matches(&self, content: &Content) -> bool {
        match self {
            Edge::Id(id) => &content.id == id,
            Edge::Metadata { field, value } => lookup_path(&content.metadata, field)
                .into_iter()
                .any(|v| value.matches(v)),
        }
    }

    fn keyed(target: &FieldRef, value: EdgeValue) -> Option<Self> {
        match target {
            FieldRef::Id => value.as_id().map(|id| Edge::Id(id.to_string())),
            FieldRef::Field(path) => Some(Edge::Metadata {
                field: path.clone(),
                value,
            }),
        }
    }
}

/// Incoming and outgoing edges of a single node.
///
/// Outgoing edges are expressed in terms of the incoming edge they match, so
/// a link `cites -> $id` yields `Edge::Id(..)` on the citing node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edges {
    pub incoming: BTreeSet<Edge>,
    pub outgoing: BTreeSet<Edge>,
}

impl Edges {
    pub fn new(incoming: BTreeSet<Edge>, outgoing: BTreeSet<Edge>) -> Self {
        Self { incoming, outgoing }
    }
}
