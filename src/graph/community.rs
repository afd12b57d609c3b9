//! Greedy modularity communities (Clauset, Newman & Moore 2004).
//!
//! Every node starts in its own community. At each step the pair of
//! connected communities whose merge increases modularity the most is
//! merged; the process stops when no merge has positive gain. Ties are
//! broken by the smallest member index of each community, so identical
//! input always yields the identical partition.

use std::collections::BTreeMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

const GAIN_EPSILON: f64 = 1e-12;

/// Partition `graph` into communities of node indices.
///
/// Communities are keyed by their smallest member index and members are
/// returned in index order. Isolated nodes form singleton communities.
pub(crate) fn greedy_modularity<N, E>(graph: &UnGraph<N, E>) -> Vec<Vec<NodeIndex>> {
    let n = graph.node_count();
    let mut members: BTreeMap<usize, Vec<usize>> = (0..n).map(|i| (i, vec![i])).collect();

    let mut links: Vec<(usize, usize)> = graph
        .edge_references()
        .map(|e| (e.source().index(), e.target().index()))
        .filter(|(a, b)| a != b)
        .map(|(a, b)| (a.min(b), a.max(b)))
        .collect();
    links.sort_unstable();
    links.dedup();

    let m = links.len() as f64;
    if m == 0.0 {
        return finish(members);
    }

    // e[i][j]: fraction of edge ends joining communities i and j (each
    // direction counted once). a[i]: fraction of edge ends in community i.
    let mut e: BTreeMap<usize, BTreeMap<usize, f64>> = BTreeMap::new();
    let mut a = vec![0.0_f64; n];
    for &(i, j) in &links {
        *e.entry(i).or_default().entry(j).or_insert(0.0) += 1.0 / (2.0 * m);
        *e.entry(j).or_default().entry(i).or_insert(0.0) += 1.0 / (2.0 * m);
        a[i] += 1.0 / (2.0 * m);
        a[j] += 1.0 / (2.0 * m);
    }

    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for (&i, row) in &e {
            for (&j, &e_ij) in row.range(i + 1..) {
                let gain = 2.0 * (e_ij - a[i] * a[j]);
                if best.map_or(true, |(g, _, _)| gain > g + GAIN_EPSILON) {
                    best = Some((gain, i, j));
                }
            }
        }

        let Some((gain, keep, absorb)) = best else { break };
        if gain <= GAIN_EPSILON {
            break;
        }
        log::trace!("Merging community {} into {} (gain {:.6})", absorb, keep, gain);

        // Fold `absorb`'s row and column into `keep`.
        let absorbed = e.remove(&absorb).unwrap_or_default();
        for (k, w) in absorbed {
            if k == keep {
                continue;
            }
            *e.entry(keep).or_default().entry(k).or_insert(0.0) += w;
            if let Some(row) = e.get_mut(&k) {
                row.remove(&absorb);
                *row.entry(keep).or_insert(0.0) += w;
            }
        }
        if let Some(row) = e.get_mut(&keep) {
            row.remove(&absorb);
        }

        a[keep] += a[absorb];
        a[absorb] = 0.0;

        let moved = members.remove(&absorb).unwrap_or_default();
        if let Some(group) = members.get_mut(&keep) {
            group.extend(moved);
            group.sort_unstable();
        }
    }

    finish(members)
}

fn finish(members: BTreeMap<usize, Vec<usize>>) -> Vec<Vec<NodeIndex>> {
    members
        .into_values()
        .map(|group| group.into_iter().map(NodeIndex::new).collect())
        .collect()
}

/// Modularity of a partition of `graph` (undirected, unweighted).
pub(crate) fn modularity<N, E>(graph: &UnGraph<N, E>, communities: &[Vec<NodeIndex>]) -> f64 {
    let mut label = vec![usize::MAX; graph.node_count()];
    for (c, group) in communities.iter().enumerate() {
        for node in group {
            label[node.index()] = c;
        }
    }

    let mut links: Vec<(usize, usize)> = graph
        .edge_references()
        .map(|e| (e.source().index(), e.target().index()))
        .filter(|(a, b)| a != b)
        .map(|(a, b)| (a.min(b), a.max(b)))
        .collect();
    links.sort_unstable();
    links.dedup();
    let m = links.len() as f64;
    if m == 0.0 {
        return 0.0;
    }

    let mut degree = vec![0.0_f64; graph.node_count()];
    let mut internal = vec![0.0_f64; communities.len()];
    for &(i, j) in &links {
        degree[i] += 1.0;
        degree[j] += 1.0;
        if label[i] == label[j] && label[i] != usize::MAX {
            internal[label[i]] += 1.0;
        }
    }

    communities
        .iter()
        .enumerate()
        .map(|(c, group)| {
            let total: f64 = group.iter().map(|node| degree[node.index()]).sum();
            internal[c] / m - (total / (2.0 * m)).powi(2)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(usize, usize)]) -> UnGraph<(), ()> {
        let mut g = UnGraph::new_undirected();
        let nodes: Vec<_> = (0..n).map(|_| g.add_node(())).collect();
        for &(a, b) in edges {
            g.add_edge(nodes[a], nodes[b], ());
        }
        g
    }

    fn indices(communities: &[Vec<NodeIndex>]) -> Vec<Vec<usize>> {
        communities
            .iter()
            .map(|c| c.iter().map(|n| n.index()).collect())
            .collect()
    }

    #[test]
    fn test_two_triangles_joined_by_bridge() {
        let g = graph(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]);
        let communities = greedy_modularity(&g);
        assert_eq!(indices(&communities), vec![vec![0, 1, 2], vec![3, 4, 5]]);
        assert!(modularity(&g, &communities) > 0.3);
    }

    #[test]
    fn test_isolated_nodes_are_singletons() {
        let g = graph(4, &[(0, 1)]);
        let communities = greedy_modularity(&g);
        assert_eq!(indices(&communities), vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn test_no_edges() {
        let g = graph(3, &[]);
        assert_eq!(indices(&greedy_modularity(&g)), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(modularity(&g, &greedy_modularity(&g)), 0.0);
    }

    #[test]
    fn test_deterministic_on_symmetric_input() {
        // A 4-cycle: every first merge has the same gain
        let g = graph(4, &[(0, 1), (1, 2), (2, 3), (3, 0)]);
        let first = indices(&greedy_modularity(&g));
        for _ in 0..5 {
            assert_eq!(indices(&greedy_modularity(&g)), first);
        }
        assert_eq!(first, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_parallel_and_self_edges_ignored() {
        let g = graph(2, &[(0, 1), (1, 0), (0, 0)]);
        assert_eq!(indices(&greedy_modularity(&g)), vec![vec![0, 1]]);
    }
}
