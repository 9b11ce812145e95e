//! Sequence plus metadata classifier.
//!
//! Each sequence tensor is pooled per feature into its mean over time and its
//! most recent step. The pooled values are concatenated with the metadata
//! features, standardised, and passed to a logistic model.

use super::logistic::{LogisticConfig, LogisticModel};
use super::models::{BaseModel, ModelError, ModelInput};
use crate::scaler::FittedScaler;
use ndarray::{Array1, Array2, ArrayView1, Axis, s};

pub struct SequenceMetaModel {
    name: String,
    head: LogisticModel,
    fitted: Option<FittedShapes>,
}

struct FittedShapes {
    sequences: Vec<(usize, usize)>,
    scaler: FittedScaler,
}

/// `[n, features + Σ 2·f_k]`: metadata, then per tensor the time mean and the last step.
fn pooled_design(input: &ModelInput) -> Array2<f64> {
    let n = input.n_samples();
    let extra: usize = input.sequences.iter().map(|t| 2 * t.len_of(Axis(2))).sum();
    let mut design = Array2::zeros((n, input.features.ncols() + extra));
    design
        .slice_mut(s![.., ..input.features.ncols()])
        .assign(&input.features);

    let mut offset = input.features.ncols();
    for tensor in &input.sequences {
        let (steps, width) = (tensor.len_of(Axis(1)), tensor.len_of(Axis(2)));
        if steps > 0 {
            if let Some(mean) = tensor.mean_axis(Axis(1)) {
                design.slice_mut(s![.., offset..offset + width]).assign(&mean);
            }
            design
                .slice_mut(s![.., offset + width..offset + 2 * width])
                .assign(&tensor.index_axis(Axis(1), steps - 1));
        }
        offset += 2 * width;
    }
    design
}

impl SequenceMetaModel {
    pub fn new(name: impl Into<String>, config: LogisticConfig) -> Self {
        let name = name.into();
        Self {
            head: LogisticModel::new(name.clone(), config),
            name,
            fitted: None,
        }
    }

    fn check_sequences(
        &self,
        input: &ModelInput,
        expected: &[(usize, usize)],
    ) -> Result<(), ModelError> {
        let found = input.input_shapes().sequences;
        if found.len() != expected.len() {
            return Err(ModelError::SequenceCountMismatch {
                expected: expected.len(),
                found: found.len(),
            });
        }
        for (index, (&(es, ef), &(fs, ff))) in expected.iter().zip(found.iter()).enumerate() {
            if (es, ef) != (fs, ff) {
                return Err(ModelError::SequenceShapeMismatch {
                    index,
                    expected_steps: es,
                    expected_features: ef,
                    found_steps: fs,
                    found_features: ff,
                });
            }
        }
        Ok(())
    }
}

impl BaseModel for SequenceMetaModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, input: &ModelInput, target: ArrayView1<f64>) -> Result<(), ModelError> {
        let design = pooled_design(input);
        let scaler = FittedScaler::fit(design.view());
        self.head.fit_matrix(scaler.transform(design.view()).view(), target)?;
        log::debug!(
            "Sequence model '{}' fitted on {} pooled columns from {} sequence inputs",
            self.name,
            design.ncols(),
            input.sequences.len()
        );
        self.fitted = Some(FittedShapes {
            sequences: input.input_shapes().sequences,
            scaler,
        });
        Ok(())
    }

    fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| ModelError::NotFitted(self.name.clone()))?;
        self.check_sequences(input, &fitted.sequences)?;
        let design = pooled_design(input);
        if design.ncols() != fitted.scaler.n_features() {
            return Err(ModelError::FeatureCountMismatch {
                expected: fitted.scaler.n_features(),
                found: design.ncols(),
            });
        }
        self.head
            .predict_matrix(fitted.scaler.transform(design.view()).view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, array};

    #[test]
    fn pooling_takes_time_mean_and_last_step() {
        let mut tensor = Array3::zeros((1, 3, 1));
        tensor[[0, 0, 0]] = 0.0;
        tensor[[0, 1, 0]] = 3.0;
        tensor[[0, 2, 0]] = 6.0;
        let input = ModelInput::new(array![[9.0]], vec![tensor]).unwrap();
        let design = pooled_design(&input);
        assert_eq!(design.dim(), (1, 3));
        assert_abs_diff_eq!(design[[0, 0]], 9.0);
        assert_abs_diff_eq!(design[[0, 1]], 3.0);
        assert_abs_diff_eq!(design[[0, 2]], 6.0);
    }

    #[test]
    fn learns_from_the_most_recent_step() {
        let n = 16;
        let target = Array1::from_shape_fn(n, |i| (i % 2) as f64);
        let tensor = Array3::from_shape_fn((n, 4, 1), |(i, t, _)| {
            if t == 3 { target[i] * 2.0 - 1.0 } else { 0.0 }
        });
        let input = ModelInput::new(Array2::zeros((n, 1)), vec![tensor]).unwrap();
        let mut model = SequenceMetaModel::new("sequence", LogisticConfig::default());
        model.fit(&input, target.view()).unwrap();
        let p = model.predict(&input).unwrap();
        assert!(p[1] > 0.7 && p[0] < 0.3);
    }

    #[test]
    fn sequence_shapes_must_match_the_fit() {
        let input = ModelInput::new(Array2::zeros((2, 1)), vec![Array3::zeros((2, 3, 1))]).unwrap();
        let mut model = SequenceMetaModel::new("sequence", LogisticConfig::default());
        model.fit(&input, array![0.0, 1.0].view()).unwrap();
        let other = ModelInput::new(Array2::zeros((2, 1)), vec![Array3::zeros((2, 4, 1))]).unwrap();
        assert!(matches!(
            model.predict(&other),
            Err(ModelError::SequenceShapeMismatch { index: 0, .. })
        ));
    }
}
