//! Gradient boosted trees with the binomial deviance loss.

use super::models::{BaseModel, ModelError, ModelInput, check_binary_target, sigmoid};
use super::tree::{RegressionTree, TreeConfig};
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_split: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            max_depth: 3,
            learning_rate: 0.1,
            min_samples_split: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    name: String,
    config: BoostingConfig,
    fitted: Option<FittedBoosting>,
}

#[derive(Debug, Clone, PartialEq)]
struct FittedBoosting {
    n_features: usize,
    /// Log-odds of the training base rate.
    initial: f64,
    trees: Vec<RegressionTree>,
}

impl FittedBoosting {
    fn raw_scores(&self, input: &ModelInput) -> Array1<f64> {
        let mut scores = Array1::from_elem(input.n_samples(), self.initial);
        for tree in &self.trees {
            for (score, row) in scores.iter_mut().zip(input.features.axis_iter(Axis(0))) {
                *score += tree.predict_row(row);
            }
        }
        scores
    }
}

impl GradientBoosting {
    pub fn new(name: impl Into<String>, config: BoostingConfig) -> Self {
        Self {
            name: name.into(),
            config,
            fitted: None,
        }
    }
}

impl BaseModel for GradientBoosting {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, input: &ModelInput, target: ArrayView1<f64>) -> Result<(), ModelError> {
        check_binary_target(target, input.n_samples())?;
        let x = input.features.view();
        let base_rate = target.mean().unwrap_or(0.5).clamp(1e-6, 1.0 - 1e-6);
        let initial = (base_rate / (1.0 - base_rate)).ln();
        let tree_config = TreeConfig {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
        };
        let weights = Array1::ones(input.n_samples());

        let mut fitted = FittedBoosting {
            n_features: x.ncols(),
            initial,
            trees: Vec::with_capacity(self.config.n_estimators),
        };
        let mut scores = Array1::from_elem(input.n_samples(), initial);
        let learning_rate = self.config.learning_rate;

        for stage in 0..self.config.n_estimators {
            let probabilities = scores.mapv(sigmoid);
            let residuals = &target - &probabilities;
            let hessians = probabilities.mapv(|p| p * (1.0 - p));
            let newton_step = |rows: &[usize]| {
                let numerator: f64 = rows.iter().map(|&r| residuals[r]).sum();
                let denominator: f64 = rows.iter().map(|&r| hessians[r]).sum();
                if denominator > 1e-12 {
                    learning_rate * numerator / denominator
                } else {
                    0.0
                }
            };
            let tree = RegressionTree::fit(
                x,
                residuals.view(),
                weights.view(),
                tree_config,
                newton_step,
            );
            for (score, row) in scores.iter_mut().zip(x.axis_iter(Axis(0))) {
                *score += tree.predict_row(row);
            }
            log::debug!(
                "Boosting '{}' stage {}: tree with {} leaves",
                self.name,
                stage + 1,
                tree.n_leaves()
            );
            fitted.trees.push(tree);
        }
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| ModelError::NotFitted(self.name.clone()))?;
        if input.features.ncols() != fitted.n_features {
            return Err(ModelError::FeatureCountMismatch {
                expected: fitted.n_features,
                found: input.features.ncols(),
            });
        }
        Ok(fitted.raw_scores(input).mapv(sigmoid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn learns_a_step_function() {
        let features = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let target = Array1::from_shape_fn(20, |i| if i >= 10 { 1.0 } else { 0.0 });
        let input = ModelInput::new(features, Vec::new()).unwrap();
        let mut model = GradientBoosting::new(
            "gbc",
            BoostingConfig {
                n_estimators: 30,
                ..BoostingConfig::default()
            },
        );
        model.fit(&input, target.view()).unwrap();
        let p = model.predict(&input).unwrap();
        assert!(p[0] < 0.2, "p[0] = {}", p[0]);
        assert!(p[19] > 0.8, "p[19] = {}", p[19]);
    }

    #[test]
    fn feature_count_is_checked() {
        let input = ModelInput::new(array![[0.0], [1.0]], Vec::new()).unwrap();
        let mut model = GradientBoosting::new("gbc", BoostingConfig::default());
        model.fit(&input, array![0.0, 1.0].view()).unwrap();
        let wide = ModelInput::new(array![[0.0, 1.0]], Vec::new()).unwrap();
        assert!(matches!(
            model.predict(&wide),
            Err(ModelError::FeatureCountMismatch { expected: 1, found: 2 })
        ));
    }
}
