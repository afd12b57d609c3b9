//! Document graph: explicit edges among an already-retrieved node set.
//!
//! Edges are re-evaluated only among the given nodes, so the graph is always
//! a subgraph of the corpus graph. No store queries are made. The graph can
//! be partitioned into communities for downstream summarization.

mod community;

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::edges::{Edge, EdgeSpec};
use crate::node::Node;

/// A group of related nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Community {
    /// Position in the partition (0 is the largest community)
    pub id: usize,
    /// Member node ids, sorted
    pub members: Vec<String>,
}

/// Directed graph over a finite node set, indexed by node id.
#[derive(Debug, Clone)]
pub struct DocumentGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DocumentGraph {
    /// Build the graph for `nodes` under `spec`.
    ///
    /// Nodes are added in id order; duplicates by id are ignored. A node has
    /// an edge to every other node carrying one of its outgoing edges as an
    /// incoming edge.
    pub fn build(nodes: &[Node], spec: &EdgeSpec) -> Self {
        let mut by_id: BTreeMap<&str, &Node> = BTreeMap::new();
        for node in nodes {
            by_id.entry(node.id.as_str()).or_insert(node);
        }

        let mut graph = DiGraph::with_capacity(by_id.len(), 0);
        let mut index = HashMap::with_capacity(by_id.len());
        let mut resolved = Vec::with_capacity(by_id.len());
        for (id, node) in &by_id {
            let idx = graph.add_node(id.to_string());
            index.insert(id.to_string(), idx);
            resolved.push((idx, spec.resolve(&node.to_content())));
        }

        let mut targets: HashMap<&Edge, Vec<NodeIndex>> = HashMap::new();
        for (idx, edges) in &resolved {
            for edge in &edges.incoming {
                targets.entry(edge).or_default().push(*idx);
            }
        }

        for (source, edges) in &resolved {
            for edge in &edges.outgoing {
                for &target in targets.get(edge).into_iter().flatten() {
                    if target != *source {
                        graph.update_edge(*source, target, ());
                    }
                }
            }
        }

        log::debug!(
            "Document graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Self { graph, index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        match (self.index.get(source), self.index.get(target)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Targets of `id`'s outgoing edges, sorted.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// All edges as `(source, target)` id pairs, sorted.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .graph
            .edge_references()
            .map(|e| (self.graph[e.source()].as_str(), self.graph[e.target()].as_str()))
            .collect();
        out.sort_unstable();
        out
    }

    /// Undirected projection used for community detection.
    fn undirected(&self) -> UnGraph<(), ()> {
        let mut projection = UnGraph::with_capacity(self.graph.node_count(), self.graph.edge_count());
        for _ in self.graph.node_indices() {
            projection.add_node(());
        }
        for edge in self.graph.edge_references() {
            projection.add_edge(edge.source(), edge.target(), ());
        }
        projection
    }

    /// Deterministic greedy-modularity partition.
    ///
    /// Communities are ordered by size (largest first), then by smallest
    /// member id.
    pub fn communities(&self) -> Vec<Community> {
        let projection = self.undirected();
        let mut groups: Vec<Vec<String>> = community::greedy_modularity(&projection)
            .into_iter()
            .map(|group| {
                let mut members: Vec<String> = group.into_iter().map(|n| self.graph[n].clone()).collect();
                members.sort();
                members
            })
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        groups
            .into_iter()
            .enumerate()
            .map(|(id, members)| Community { id, members })
            .collect()
    }

    /// Modularity of `communities` on the undirected projection.
    pub fn modularity(&self, communities: &[Community]) -> f64 {
        let groups: Vec<Vec<NodeIndex>> = communities
            .iter()
            .map(|c| c.members.iter().filter_map(|id| self.index.get(id).copied()).collect())
            .collect();
        community::modularity(&self.undirected(), &groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Content;
    use serde_json::json;

    fn node(content: Content, spec: &EdgeSpec) -> Node {
        let edges = spec.resolve(&content);
        Node::from_content(content, 0, edges, None)
    }

    fn papers(spec: &EdgeSpec) -> Vec<Node> {
        vec![
            node(Content::new("a", "").with_metadata("cites", json!(["b", "c", "zzz"])), spec),
            node(Content::new("b", "").with_metadata("cites", json!(["c"])), spec),
            node(Content::new("c", ""), spec),
            node(Content::new("d", "").with_metadata("cites", json!(["e"])), spec),
            node(Content::new("e", "").with_metadata("cites", json!(["d"])), spec),
        ]
    }

    #[test]
    fn test_build_citation_graph() {
        let spec = EdgeSpec::from_pairs(&[("cites", "$id")]).unwrap();
        let graph = DocumentGraph::build(&papers(&spec), &spec);
        assert_eq!(graph.node_count(), 5);
        assert_eq!(
            graph.edges(),
            vec![("a", "b"), ("a", "c"), ("b", "c"), ("d", "e"), ("e", "d")]
        );
        assert!(graph.has_edge("a", "b"));
        assert!(!graph.has_edge("b", "a"));
        // Targets outside the set are not materialized
        assert!(!graph.contains("zzz"));
        assert_eq!(graph.neighbors("a"), vec!["b", "c"]);
    }

    #[test]
    fn test_shared_attribute_edges_both_ways_without_self_loops() {
        let spec = EdgeSpec::from_pairs(&[("topic", "topic")]).unwrap();
        let nodes = vec![
            node(Content::new("x", "").with_metadata("topic", "t"), &spec),
            node(Content::new("y", "").with_metadata("topic", json!(["t", "u"])), &spec),
        ];
        let graph = DocumentGraph::build(&nodes, &spec);
        assert_eq!(graph.edges(), vec![("x", "y"), ("y", "x")]);
    }

    #[test]
    fn test_duplicate_nodes_ignored() {
        let spec = EdgeSpec::from_pairs(&[("cites", "$id")]).unwrap();
        let mut nodes = papers(&spec);
        nodes.push(nodes[0].clone());
        let graph = DocumentGraph::build(&nodes, &spec);
        assert_eq!(graph.node_count(), 5);
    }

    #[test]
    fn test_communities_ordered_and_stable() {
        let spec = EdgeSpec::from_pairs(&[("cites", "$id")]).unwrap();
        let graph = DocumentGraph::build(&papers(&spec), &spec);
        let communities = graph.communities();
        assert_eq!(
            communities,
            vec![
                Community {
                    id: 0,
                    members: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                },
                Community {
                    id: 1,
                    members: vec!["d".to_string(), "e".to_string()],
                },
            ]
        );
        assert_eq!(graph.communities(), communities);
        assert!(graph.modularity(&communities) > 0.0);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DocumentGraph::build(&[], &EdgeSpec::default());
        assert_eq!(graph.node_count(), 0);
        assert!(graph.communities().is_empty());
    }
}
