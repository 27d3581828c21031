use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

/// Directed edge weights keyed by `(source, target)`.
pub type WeightedEdges = BTreeMap<(String, String), f64>;

/// Compute weighted PageRank scores using the iterative power method.
///
/// Each node passes rank to its targets in proportion to edge weight.
/// Nodes without out-flow spread their rank evenly. Returns a map of node
/// ID to score; scores sum to 1.0.
pub fn weighted_pagerank(
    nodes: &BTreeSet<String>,
    edges: &WeightedEdges,
    damping: f64,
    max_iterations: usize,
    convergence: f64,
) -> BTreeMap<String, f64> {
    let n = nodes.len();
    if n == 0 {
        return BTreeMap::new();
    }

    let initial = 1.0 / n as f64;
    let mut scores: BTreeMap<String, f64> = nodes.iter().map(|id| (id.clone(), initial)).collect();

    // Pre-compute total out-weight for each node
    let mut out_weight: BTreeMap<&str, f64> = BTreeMap::new();
    for ((source, _), w) in edges {
        *out_weight.entry(source.as_str()).or_insert(0.0) += w;
    }

    let base = (1.0 - damping) / n as f64;

    for iteration in 0..max_iterations {
        let dangling: f64 = nodes
            .iter()
            .filter(|id| out_weight.get(id.as_str()).copied().unwrap_or(0.0) <= 0.0)
            .map(|id| scores[id])
            .sum();
        let spread = damping * dangling / n as f64;

        let mut new_scores: BTreeMap<String, f64> =
            nodes.iter().map(|id| (id.clone(), base + spread)).collect();

        for ((source, target), w) in edges {
            let total = out_weight.get(source.as_str()).copied().unwrap_or(0.0);
            if total <= 0.0 {
                continue;
            }
            let share = scores.get(source).copied().unwrap_or(0.0) * w / total;
            if let Some(slot) = new_scores.get_mut(target) {
                *slot += damping * share;
            }
        }

        // Check convergence (L1 norm)
        let diff: f64 = nodes
            .iter()
            .map(|id| (new_scores[id] - scores[id]).abs())
            .sum();

        scores = new_scores;

        if diff < convergence {
            debug!(
                "PageRank converged after {} iterations (diff={:.2e})",
                iteration + 1,
                diff
            );
            return scores;
        }
    }

    debug!(
        "PageRank completed {} iterations without convergence",
        max_iterations
    );
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn edge(a: &str, b: &str, w: f64) -> ((String, String), f64) {
        ((a.to_string(), b.to_string()), w)
    }

    #[test]
    fn pagerank_cycle_equal() {
        // alice -> bob -> carol -> alice
        let edges: WeightedEdges = [
            edge("alice", "bob", 1.0),
            edge("bob", "carol", 1.0),
            edge("carol", "alice", 1.0),
        ]
        .into_iter()
        .collect();
        let pr = weighted_pagerank(&nodes(&["alice", "bob", "carol"]), &edges, 0.85, 100, 1e-9);

        assert_eq!(pr.len(), 3);
        for v in pr.values() {
            assert!((v - 1.0 / 3.0).abs() < 1e-6, "expected ~1/3, got {}", v);
        }
    }

    #[test]
    fn heavier_edge_gets_more_rank() {
        let edges: WeightedEdges = [edge("hub", "a", 9.0), edge("hub", "b", 1.0)]
            .into_iter()
            .collect();
        let pr = weighted_pagerank(&nodes(&["hub", "a", "b"]), &edges, 0.85, 100, 1e-9);
        assert!(pr["a"] > pr["b"]);
        let total: f64 = pr.values().sum();
        assert!((total - 1.0).abs() < 1e-6, "scores sum to {total}");
    }

    #[test]
    fn pagerank_empty() {
        let pr = weighted_pagerank(&BTreeSet::new(), &WeightedEdges::new(), 0.85, 20, 1e-6);
        assert!(pr.is_empty());
    }
}
