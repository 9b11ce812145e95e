//! Ridge-penalised logistic regression fitted by iteratively reweighted least squares.
//!
//! Used as the linear base model on the metadata features and as the
//! meta-classifier over base-model predictions. With `balanced = true` every
//! sample of class `c` gets weight `n / (2 · n_c)`.

use super::models::{BaseModel, ModelError, ModelInput, check_binary_target, sigmoid};
use crate::regression::solve_symmetric_pseudo_inverse;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// Penalty on the slopes; the intercept is not penalised.
    pub l2: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub balanced: bool,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iterations: 25,
            tolerance: 1e-6,
            balanced: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticModel {
    name: String,
    config: LogisticConfig,
    /// Intercept first, then one slope per feature.
    coefficients: Option<Array1<f64>>,
}

fn with_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    Array2::from_shape_fn((x.nrows(), x.ncols() + 1), |(i, j)| {
        if j == 0 { 1.0 } else { x[[i, j - 1]] }
    })
}

/// `n / (2 · n_c)` per sample, or all ones when `balanced` is off.
pub(crate) fn class_weights(target: ArrayView1<f64>, balanced: bool) -> Array1<f64> {
    let n = target.len() as f64;
    if !balanced {
        return Array1::ones(target.len());
    }
    let positives = target.iter().filter(|&&y| y == 1.0).count() as f64;
    let negatives = n - positives;
    target.mapv(|y| {
        let count = if y == 1.0 { positives } else { negatives };
        if count > 0.0 { n / (2.0 * count) } else { 0.0 }
    })
}

impl LogisticModel {
    pub fn new(name: impl Into<String>, config: LogisticConfig) -> Self {
        Self {
            name: name.into(),
            config,
            coefficients: None,
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn fit_matrix(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_binary_target(y, x.nrows())?;
        let design = with_intercept(x);
        let p = design.ncols();
        let weights = class_weights(y, self.config.balanced);
        let mut beta = Array1::<f64>::zeros(p);

        let mut penalty = Array1::from_elem(p, self.config.l2);
        penalty[0] = 0.0;

        for iteration in 1..=self.config.max_iterations {
            let eta = design.dot(&beta);
            let mu = eta.mapv(sigmoid);
            // Fisher weights floored to keep the Hessian well conditioned.
            let fisher = (&mu * &(1.0 - &mu)).mapv(|v| v.max(1e-10)) * &weights;
            let residual = (&y - &mu) * &weights;

            let weighted_design = &design * &fisher.view().insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted_design);
            for j in 0..p {
                hessian[[j, j]] += penalty[j];
            }
            let gradient = design.t().dot(&residual) - &(&penalty * &beta);
            let step = solve_symmetric_pseudo_inverse(&hessian, &gradient)?;
            beta += &step;

            let largest = step.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            log::debug!(
                "Logistic '{}' IRLS iteration {}: max step {:.3e}",
                self.name,
                iteration,
                largest
            );
            if largest < self.config.tolerance {
                break;
            }
        }
        self.coefficients = Some(beta);
        Ok(())
    }

    pub fn predict_matrix(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let beta = self
            .coefficients
            .as_ref()
            .ok_or_else(|| ModelError::NotFitted(self.name.clone()))?;
        if x.ncols() + 1 != beta.len() {
            return Err(ModelError::FeatureCountMismatch {
                expected: beta.len() - 1,
                found: x.ncols(),
            });
        }
        Ok(with_intercept(x).dot(beta).mapv(sigmoid))
    }
}

impl BaseModel for LogisticModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, input: &ModelInput, target: ArrayView1<f64>) -> Result<(), ModelError> {
        self.fit_matrix(input.features.view(), target)
    }

    fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError> {
        self.predict_matrix(input.features.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn separates_a_noisy_threshold() {
        let x = array![[-2.0], [-1.5], [-1.0], [-0.5], [0.5], [1.0], [1.5], [2.0], [0.2], [-0.2]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0];
        let mut model = LogisticModel::new("linear", LogisticConfig::default());
        model.fit_matrix(x.view(), y.view()).unwrap();
        let p = model.predict_matrix(array![[-3.0], [3.0]].view()).unwrap();
        assert!(p[0] < 0.2);
        assert!(p[1] > 0.8);
    }

    #[test]
    fn balanced_weights_equalise_class_mass() {
        let y = array![1.0, 0.0, 0.0, 0.0];
        let w = class_weights(y.view(), true);
        assert_abs_diff_eq!(w[0], 2.0);
        assert_abs_diff_eq!(w[1], 4.0 / 6.0);
        assert_abs_diff_eq!(w[0], w.slice(ndarray::s![1..]).sum(), epsilon = 1e-12);
    }

    #[test]
    fn balanced_intercept_only_model_predicts_one_half() {
        let x = Array2::<f64>::zeros((4, 0));
        let y = array![1.0, 0.0, 0.0, 0.0];
        let mut model = LogisticModel::new(
            "meta",
            LogisticConfig {
                balanced: true,
                ..LogisticConfig::default()
            },
        );
        model.fit_matrix(x.view(), y.view()).unwrap();
        let p = model.predict_matrix(Array2::zeros((1, 0)).view()).unwrap();
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn predicting_before_fitting_fails() {
        let model = LogisticModel::new("linear", LogisticConfig::default());
        assert!(matches!(
            model.predict_matrix(array![[1.0]].view()),
            Err(ModelError::NotFitted(_))
        ));
    }
}
