//! Half-space trees: an online anomaly detector for streaming data.
//!
//! Each tree is a complete binary tree of fixed height whose internal
//! nodes split a randomly chosen feature at a random point inside the
//! range inherited from their ancestors. Features are expected in
//! `[0, 1]`.
//!
//! Every node keeps two mass counters. `l_mass` counts the points seen in
//! the current window; when the window fills it becomes the reference
//! mass `r_mass` and counting restarts. Scoring walks each tree and sums
//! `r_mass * 2^depth`, stopping once the reference mass becomes too small
//! to be meaningful. Dense regions produce large sums; the sum is
//! normalised and inverted so that `0` is normal and `1` maximally
//! anomalous.
//!
//! Until the first window has been filled the reference masses are all
//! zero and every point scores `0`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracescale_core::config::{MAX_TREE_HEIGHT, ModelConfig};

/// Reference mass below which a walk stops descending, as a fraction of
/// the window size.
const SIZE_LIMIT_FRACTION: f64 = 0.1;

/// Online scorer used by the sampler.
pub trait AnomalyScorer {
    /// Update the model with one observation.
    fn learn(&mut self, features: &[f64]);

    /// Anomaly score in `[0, 1]`; higher is more unusual.
    fn score(&self, features: &[f64]) -> f64;
}

#[derive(Debug, Clone, Default)]
struct Node {
    feature: usize,
    threshold: f64,
    l_mass: f64,
    r_mass: f64,
}

/// Nodes stored breadth first: children of `i` are `2i + 1` and `2i + 2`.
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn grow(height: usize, n_features: usize, rng: &mut StdRng) -> Self {
        let mut nodes = vec![Node::default(); (1 << (height + 1)) - 1];
        let mut limits = vec![(0.0, 1.0); n_features];
        split(&mut nodes, 0, 0, height, &mut limits, rng);
        Self { nodes }
    }

    fn is_leaf(&self, idx: usize) -> bool {
        2 * idx + 1 >= self.nodes.len()
    }

    fn child(&self, idx: usize, x: &[f64]) -> usize {
        let node = &self.nodes[idx];
        let value = x.get(node.feature).copied().unwrap_or(0.0);
        if value < node.threshold {
            2 * idx + 1
        } else {
            2 * idx + 2
        }
    }
}

fn split(
    nodes: &mut [Node],
    idx: usize,
    depth: usize,
    height: usize,
    limits: &mut [(f64, f64)],
    rng: &mut StdRng,
) {
    if depth == height {
        return;
    }
    let feature = rng.gen_range(0..limits.len());
    let (lo, hi) = limits[feature];
    let threshold = lo + rng.gen_range(0.0..1.0) * (hi - lo);
    nodes[idx].feature = feature;
    nodes[idx].threshold = threshold;

    limits[feature] = (lo, threshold);
    split(nodes, 2 * idx + 1, depth + 1, height, limits, rng);
    limits[feature] = (threshold, hi);
    split(nodes, 2 * idx + 2, depth + 1, height, limits, rng);
    limits[feature] = (lo, hi);
}

#[derive(Debug, Clone)]
pub struct HalfSpaceTrees {
    trees: Vec<Tree>,
    height: usize,
    window_size: u64,
    counter: u64,
    first_window: bool,
}

impl HalfSpaceTrees {
    /// Heights above [`MAX_TREE_HEIGHT`] are clamped to it.
    pub fn new(n_features: usize, config: &ModelConfig) -> Self {
        let n_features = n_features.max(1);
        let height = config.height.min(MAX_TREE_HEIGHT);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let trees = (0..config.n_trees.max(1))
            .map(|_| Tree::grow(height, n_features, &mut rng))
            .collect();
        Self {
            trees,
            height,
            window_size: config.window_size.max(1),
            counter: 0,
            first_window: true,
        }
    }

    /// True until the first window of observations has been completed.
    pub fn in_first_window(&self) -> bool {
        self.first_window
    }

    fn max_score(&self) -> f64 {
        self.trees.len() as f64 * self.window_size as f64 * ((1u64 << (self.height + 1)) - 1) as f64
    }
}

impl AnomalyScorer for HalfSpaceTrees {
    fn learn(&mut self, features: &[f64]) {
        for tree in &mut self.trees {
            let mut idx = 0;
            loop {
                tree.nodes[idx].l_mass += 1.0;
                if tree.is_leaf(idx) {
                    break;
                }
                idx = tree.child(idx, features);
            }
        }

        self.counter += 1;
        if self.counter == self.window_size {
            for node in self.trees.iter_mut().flat_map(|t| t.nodes.iter_mut()) {
                node.r_mass = node.l_mass;
                node.l_mass = 0.0;
            }
            self.first_window = false;
            self.counter = 0;
        }
    }

    fn score(&self, features: &[f64]) -> f64 {
        if self.first_window {
            return 0.0;
        }

        let size_limit = SIZE_LIMIT_FRACTION * self.window_size as f64;
        let mut total = 0.0;
        for tree in &self.trees {
            let mut idx = 0;
            let mut depth = 0;
            loop {
                let node = &tree.nodes[idx];
                total += node.r_mass * (1u64 << depth) as f64;
                if node.r_mass < size_limit || tree.is_leaf(idx) {
                    break;
                }
                idx = tree.child(idx, features);
                depth += 1;
            }
        }

        (1.0 - total / self.max_score()).clamp(0.0, 1.0)
    }
}
