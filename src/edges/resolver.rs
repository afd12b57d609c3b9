//! Resolves an [`EdgeSpec`] against a node's metadata.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{Edge, EdgeRule, EdgeValue, Edges, FieldRef};
use crate::node::{lookup_path, Content};
use crate::{Result, RetrieverError};

/// Computes the edges of a node directly. Implementations must be
/// deterministic.
pub type EdgeFunction = Arc<dyn Fn(&Content) -> Edges + Send + Sync>;

/// How the edges of a traversal are defined.
#[derive(Clone)]
pub enum EdgeSpec {
    /// Ordered field-pair rules, fixed for the invocation
    Rules(Vec<EdgeRule>),
    /// Per-node function producing edges
    Dynamic(EdgeFunction),
}

impl Default for EdgeSpec {
    fn default() -> Self {
        EdgeSpec::Rules(Vec::new())
    }
}

impl fmt::Debug for EdgeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeSpec::Rules(rules) => f.debug_tuple("Rules").field(rules).finish(),
            EdgeSpec::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

impl From<Vec<EdgeRule>> for EdgeSpec {
    fn from(rules: Vec<EdgeRule>) -> Self {
        EdgeSpec::Rules(rules)
    }
}

impl EdgeSpec {
    /// Parse `(source, target)` pairs, failing on the first malformed rule.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let rules = pairs
            .iter()
            .map(|(source, target)| EdgeRule::new(source, target))
            .collect::<Result<Vec<_>>>()?;
        Ok(EdgeSpec::Rules(rules))
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Content) -> Edges + Send + Sync + 'static,
    {
        EdgeSpec::Dynamic(Arc::new(f))
    }

    /// `true` when no traversal is possible.
    pub fn is_empty(&self) -> bool {
        matches!(self, EdgeSpec::Rules(rules) if rules.is_empty())
    }

    /// Reject duplicated rules; they would double the adjacency work.
    pub fn validate(&self) -> Result<()> {
        if let EdgeSpec::Rules(rules) = self {
            for (i, rule) in rules.iter().enumerate() {
                if rules[..i].contains(rule) {
                    return Err(RetrieverError::Config(format!(
                        "duplicate edge rule '{}'",
                        rule
                    )));
                }
            }
        }
        Ok(())
    }

    /// Compute the incoming and outgoing edges of `content`.
    ///
    /// A rule whose source field is missing contributes no outgoing edge.
    pub fn resolve(&self, content: &Content) -> Edges {
        let rules = match self {
            EdgeSpec::Dynamic(f) => return f(content),
            EdgeSpec::Rules(rules) => rules,
        };

        let mut incoming = BTreeSet::new();
        let mut outgoing = BTreeSet::new();
        for rule in rules {
            for value in values_of(&rule.target, content) {
                if let Some(edge) = Edge::keyed(&rule.target, value) {
                    incoming.insert(edge);
                }
            }
            for value in values_of(&rule.source, content) {
                if let Some(edge) = Edge::keyed(&rule.target, value) {
                    outgoing.insert(edge);
                }
            }
        }
        Edges::new(incoming, outgoing)
    }
}

fn values_of(field: &FieldRef, content: &Content) -> Vec<EdgeValue> {
    match field {
        FieldRef::Id => vec![EdgeValue::Text(content.id.clone())],
        FieldRef::Field(path) => lookup_path(&content.metadata, path)
            .into_iter()
            .filter_map(|value| {
                let key = EdgeValue::from_json(value);
                if key.is_none() {
                    if let Value::Object(_) = value {
                        log::warn!(
                            "Unsupported object value in '{}' of node {}, no edge created",
                            path,
                            content.id
                        );
                    }
                }
                key
            })
            .collect(),
    }
}
