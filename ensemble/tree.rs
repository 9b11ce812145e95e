//! Depth-limited regression trees shared by the boosting models.
//!
//! Splits minimise the weighted squared error of the fitting targets. Leaf
//! values come from a caller-supplied rule so that gradient boosting (Newton
//! step) and AdaBoost (weighted majority sign) can share the same growth code.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

/// Gains below this are treated as "no useful split".
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

impl SplitCandidate {
    /// Higher gain wins; ties go to the lower feature index so the result does
    /// not depend on how rayon partitions the search.
    fn better(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(x), Some(y)) => {
                if y.gain > x.gain || (y.gain == x.gain && y.feature < x.feature) {
                    Some(y)
                } else {
                    Some(x)
                }
            }
            (x, None) => x,
            (None, y) => y,
        }
    }
}

/// Training data borrowed for one tree.
struct GrowContext<'a, F> {
    x: ArrayView2<'a, f64>,
    targets: ArrayView1<'a, f64>,
    weights: ArrayView1<'a, f64>,
    config: TreeConfig,
    leaf_value: F,
}

impl<F> GrowContext<'_, F>
where
    F: Fn(&[usize]) -> f64 + Sync,
{
    fn weighted_sse(&self, rows: &[usize]) -> f64 {
        let (w, wy, wyy) = rows.iter().fold((0.0, 0.0, 0.0), |(w, wy, wyy), &r| {
            let (wi, yi) = (self.weights[r], self.targets[r]);
            (w + wi, wy + wi * yi, wyy + wi * yi * yi)
        });
        if w > 0.0 { wyy - wy * wy / w } else { 0.0 }
    }

    fn best_split_on(
        &self,
        rows: &[usize],
        feature: usize,
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let column = self.x.column(feature);
        let mut order = rows.to_vec();
        order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

        let (total_w, total_wy, total_wyy) = order.iter().fold((0.0, 0.0, 0.0), |acc, &r| {
            let (wi, yi) = (self.weights[r], self.targets[r]);
            (acc.0 + wi, acc.1 + wi * yi, acc.2 + wi * yi * yi)
        });

        let mut best: Option<SplitCandidate> = None;
        let (mut left_w, mut left_wy, mut left_wyy) = (0.0, 0.0, 0.0);
        for k in 0..order.len().saturating_sub(1) {
            let r = order[k];
            let (wi, yi) = (self.weights[r], self.targets[r]);
            left_w += wi;
            left_wy += wi * yi;
            left_wyy += wi * yi * yi;

            let (here, next) = (column[r], column[order[k + 1]]);
            if here == next || here.is_nan() || next.is_nan() {
                continue;
            }
            let right_w = total_w - left_w;
            if left_w <= 0.0 || right_w <= 0.0 {
                continue;
            }
            let right_wy = total_wy - left_wy;
            let right_wyy = total_wyy - left_wyy;
            let sse = (left_wyy - left_wy * left_wy / left_w)
                + (right_wyy - right_wy * right_wy / right_w);
            let gain = parent_sse - sse;
            if gain > MIN_GAIN && best.is_none_or(|b| gain > b.gain) {
                best = Some(SplitCandidate {
                    gain,
                    feature,
                    threshold: 0.5 * (here + next),
                });
            }
        }
        best
    }

    fn grow(&self, nodes: &mut Vec<Node>, rows: &[usize], depth: usize) -> usize {
        let slot = nodes.len();
        nodes.push(Node::Leaf {
            value: (self.leaf_value)(rows),
        });
        if depth >= self.config.max_depth || rows.len() < self.config.min_samples_split.max(2) {
            return slot;
        }

        let parent_sse = self.weighted_sse(rows);
        let best = (0..self.x.ncols())
            .into_par_iter()
            .map(|feature| self.best_split_on(rows, feature, parent_sse))
            .reduce(|| None, SplitCandidate::better);

        let Some(split) = best else {
            return slot;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x[[r, split.feature]] <= split.threshold);

        let left = self.grow(nodes, &left_rows, depth + 1);
        let right = self.grow(nodes, &right_rows, depth + 1);
        nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }
}

impl RegressionTree {
    /// Grows a tree on all rows of `x`.
    ///
    /// `leaf_value` receives the row indices that end in a leaf and returns the
    /// value stored there.
    pub fn fit<F>(
        x: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        weights: ArrayView1<f64>,
        config: TreeConfig,
        leaf_value: F,
    ) -> Self
    where
        F: Fn(&[usize]) -> f64 + Sync,
    {
        let context = GrowContext {
            x: x.reborrow(),
            targets: targets.reborrow(),
            weights: weights.reborrow(),
            config,
            leaf_value,
        };
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut nodes = Vec::new();
        context.grow(&mut nodes, &rows, 0);
        Self { nodes }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    fn mean_of(targets: &Array1<f64>) -> impl Fn(&[usize]) -> f64 + Sync + '_ {
        move |rows: &[usize]| rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
    }

    #[test]
    fn finds_the_informative_feature() {
        let x = array![[5.0, 1.0], [3.0, 2.0], [4.0, 3.0], [1.0, 4.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let w = Array1::ones(4);
        let config = TreeConfig {
            max_depth: 1,
            min_samples_split: 2,
        };
        let tree = RegressionTree::fit(x.view(), y.view(), w.view(), config, mean_of(&y));
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.predict_row(array![0.0, 1.5].view()), 0.0);
        assert_eq!(tree.predict_row(array![0.0, 3.5].view()), 1.0);
    }

    #[test]
    fn constant_targets_give_a_single_leaf() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 1.0];
        let w = Array1::ones(3);
        let config = TreeConfig {
            max_depth: 3,
            min_samples_split: 2,
        };
        let tree = RegressionTree::fit(x.view(), y.view(), w.view(), config, mean_of(&y));
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.predict_row(array![10.0].view()), 1.0);
    }
}
