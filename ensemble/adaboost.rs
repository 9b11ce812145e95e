//! Discrete AdaBoost (SAMME, two classes) over decision stumps.

use super::models::{BaseModel, ModelError, ModelInput, check_binary_target, sigmoid};
use super::tree::{RegressionTree, TreeConfig};
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
}

impl Default for AdaBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            learning_rate: 1.0,
        }
    }
}

const STUMP: TreeConfig = TreeConfig {
    max_depth: 1,
    min_samples_split: 2,
};

#[derive(Debug, Clone)]
pub struct AdaBoost {
    name: String,
    config: AdaBoostConfig,
    fitted: Option<FittedAdaBoost>,
}

#[derive(Debug, Clone, PartialEq)]
struct FittedAdaBoost {
    n_features: usize,
    /// Stumps voting `-1` or `+1`, with their weights.
    stumps: Vec<(RegressionTree, f64)>,
}

impl AdaBoost {
    pub fn new(name: impl Into<String>, config: AdaBoostConfig) -> Self {
        Self {
            name: name.into(),
            config,
            fitted: None,
        }
    }
}

impl BaseModel for AdaBoost {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, input: &ModelInput, target: ArrayView1<f64>) -> Result<(), ModelError> {
        check_binary_target(target, input.n_samples())?;
        let x = input.features.view();
        let n = input.n_samples();
        let signs = target.mapv(|y| if y == 1.0 { 1.0 } else { -1.0 });
        let mut weights = Array1::from_elem(n, 1.0 / n as f64);
        let mut stumps = Vec::with_capacity(self.config.n_estimators);

        for round in 0..self.config.n_estimators {
            let majority = |rows: &[usize]| {
                let vote: f64 = rows.iter().map(|&r| weights[r] * signs[r]).sum();
                if vote >= 0.0 { 1.0 } else { -1.0 }
            };
            let stump = RegressionTree::fit(x, signs.view(), weights.view(), STUMP, majority);
            let votes: Array1<f64> = x
                .axis_iter(Axis(0))
                .map(|row| stump.predict_row(row))
                .collect();

            let total: f64 = weights.sum();
            let error: f64 = votes
                .iter()
                .zip(signs.iter())
                .zip(weights.iter())
                .filter(|((v, s), _)| v != s)
                .map(|(_, w)| *w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                log::debug!(
                    "AdaBoost '{}' round {}: perfect stump, stopping",
                    self.name,
                    round + 1
                );
                stumps.push((stump, 1.0));
                break;
            }
            if error >= 0.5 {
                log::debug!(
                    "AdaBoost '{}' round {}: weighted error {:.3} is no better than chance, \
                     stopping",
                    self.name,
                    round + 1,
                    error
                );
                break;
            }

            let alpha = self.config.learning_rate * ((1.0 - error) / error).ln();
            for ((w, v), s) in weights.iter_mut().zip(votes.iter()).zip(signs.iter()) {
                if v != s {
                    *w *= alpha.exp();
                }
            }
            let total: f64 = weights.sum();
            weights.mapv_inplace(|w| w / total);
            log::debug!(
                "AdaBoost '{}' round {}: error {:.4}, weight {:.4}",
                self.name,
                round + 1,
                error,
                alpha
            );
            stumps.push((stump, alpha));
        }

        self.fitted = Some(FittedAdaBoost {
            n_features: x.ncols(),
            stumps,
        });
        Ok(())
    }

    /// Probability is the logistic of the weighted stump vote.
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
        Ok(input
            .features
            .axis_iter(Axis(0))
            .map(|row| {
                let vote: f64 = fitted
                    .stumps
                    .iter()
                    .map(|(stump, alpha)| alpha * stump.predict_row(row))
                    .sum();
                sigmoid(vote)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn stumps_rank_positives_above_negatives() {
        let features = Array2::from_shape_fn((12, 2), |(i, j)| {
            if j == 0 { i as f64 } else { ((i * 7) % 5) as f64 }
        });
        let target = Array1::from_shape_fn(12, |i| if i >= 6 { 1.0 } else { 0.0 });
        let input = ModelInput::new(features, Vec::new()).unwrap();
        let mut model = AdaBoost::new("abc", AdaBoostConfig::default());
        model.fit(&input, target.view()).unwrap();
        let p = model.predict(&input).unwrap();
        assert!(p[11] > 0.5);
        assert!(p[0] < 0.5);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn unfitted_model_reports_its_name() {
        let model = AdaBoost::new("abc", AdaBoostConfig::default());
        let input = ModelInput::new(Array2::zeros((1, 1)), Vec::new()).unwrap();
        assert!(matches!(model.predict(&input), Err(ModelError::NotFitted(name)) if name == "abc"));
    }
}
