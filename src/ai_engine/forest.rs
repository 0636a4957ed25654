//! Random-forest regression over dense feature rows.
//!
//! Each tree is a squared-error CART grown to purity on a bootstrap sample,
//! considering every feature at every split. Trees are stored as flat node
//! lists so a fitted forest serializes to plain numbers.

use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub min_samples_split: usize,
    pub max_depth: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            min_samples_split: 2,
            max_depth: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        samples: Vec<usize>,
        params: &ForestParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, samples, 0, params);
        tree
    }

    /// Appends the subtree for `samples` and returns its root index.
    fn grow(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        samples: Vec<usize>,
        depth: usize,
        params: &ForestParams,
    ) -> usize {
        let node_index = self.nodes.len();
        let mean = samples.iter().map(|&i| y[i]).sum::<f64>() / samples.len() as f64;
        self.nodes.push(TreeNode::Leaf { value: mean });

        let depth_reached = params.max_depth.is_some_and(|max| depth >= max);
        let pure = samples.iter().all(|&i| y[i] == y[samples[0]]);
        if depth_reached || pure || samples.len() < params.min_samples_split {
            return node_index;
        }

        let Some(split) = best_split(x, y, &samples) else {
            return node_index;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        let left = self.grow(x, y, left_samples, depth + 1, params);
        let right = self.grow(x, y, right_samples, depth + 1, params);
        self.nodes[node_index] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };

        node_index
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

struct Split {
    feature: usize,
    threshold: f64,
}

/// Lowest total squared error split over all features, if any feature varies.
fn best_split(x: &Array2<f64>, y: &Array1<f64>, samples: &[usize]) -> Option<Split> {
    let n = samples.len() as f64;
    let total_sum: f64 = samples.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = samples.iter().map(|&i| y[i] * y[i]).sum();

    let mut best: Option<(f64, Split)> = None;
    let mut order = samples.to_vec();

    for feature in 0..x.ncols() {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 0..order.len() - 1 {
            let i = order[pos];
            left_sum += y[i];
            left_sq += y[i] * y[i];

            let current = x[[i, feature]];
            let next = x[[order[pos + 1], feature]];
            if current >= next {
                continue;
            }

            let left_n = (pos + 1) as f64;
            let right_n = n - left_n;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let error = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);

            if best.as_ref().map_or(true, |(best_error, _)| error < *best_error) {
                let mut threshold = current + (next - current) / 2.0;
                if threshold >= next {
                    threshold = current;
                }
                best = Some((error, Split { feature, threshold }));
            }
        }
    }

    best.map(|(_, split)| split)
}

/// Averaged ensemble of bootstrap-trained regression trees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomForestRegressor {
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &ForestParams) -> EngineResult<Self> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(EngineError::failure("cannot fit a forest on zero samples"));
        }
        if y.len() != n_samples {
            return Err(EngineError::failure(format!(
                "feature rows ({n_samples}) and labels ({}) differ in length",
                y.len()
            )));
        }
        if params.n_estimators == 0 {
            return Err(EngineError::failure("n_estimators must be at least 1"));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_estimators)
            .map(|_| {
                let samples: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                RegressionTree::fit(x, y, samples, params)
            })
            .collect();

        Ok(Self {
            n_features: x.ncols(),
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }

    /// Coefficient of determination of the predictions on `(x, y)`.
    pub fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        r2_score(y, &self.predict(x))
    }
}

/// R² with the degenerate constant-target case mapped to 1.0 (exact) or 0.0.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}
