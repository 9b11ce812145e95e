//! The uniform fit/predict contract shared by every base classifier.

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use ndarray_linalg::error::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model '{0}' was used for prediction before it was fitted.")]
    NotFitted(String),

    #[error("Cannot fit a model on an empty training set.")]
    EmptyTrainingSet,

    #[error("Expected {expected} samples, but found {found}.")]
    SampleCountMismatch { expected: usize, found: usize },

    #[error("Model was fitted on {expected} features, but the input has {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },

    #[error(
        "Sequence input {index} has shape [{found_steps}, {found_features}] per sample, \
         but the model expects [{expected_steps}, {expected_features}]."
    )]
    SequenceShapeMismatch {
        index: usize,
        expected_steps: usize,
        expected_features: usize,
        found_steps: usize,
        found_features: usize,
    },

    #[error("Model expects {expected} sequence inputs, but {found} were given.")]
    SequenceCountMismatch { expected: usize, found: usize },

    #[error("Targets must be 0 or 1, but found {0}.")]
    NonBinaryTarget(f64),

    #[error("Linear algebra failure while fitting: {0}")]
    Linalg(#[from] LinalgError),
}

/// Per-sample shapes of a model input: the metadata width and
/// `(tmax, features)` of every sequence tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShapes {
    pub features: usize,
    pub sequences: Vec<(usize, usize)>,
}

/// Everything a base model may look at for a batch of applicants.
///
/// Row `i` of `features` and sample `i` of every sequence tensor describe the
/// same applicant.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub features: Array2<f64>,
    pub sequences: Vec<Array3<f64>>,
}

impl ModelInput {
    pub fn new(features: Array2<f64>, sequences: Vec<Array3<f64>>) -> Result<Self, ModelError> {
        let n = features.nrows();
        if let Some(tensor) = sequences.iter().find(|t| t.len_of(Axis(0)) != n) {
            return Err(ModelError::SampleCountMismatch {
                expected: n,
                found: tensor.len_of(Axis(0)),
            });
        }
        Ok(Self {
            features,
            sequences,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn input_shapes(&self) -> InputShapes {
        InputShapes {
            features: self.features.ncols(),
            sequences: self
                .sequences
                .iter()
                .map(|t| (t.len_of(Axis(1)), t.len_of(Axis(2))))
                .collect(),
        }
    }

    /// Rows at `indices`, in that order; indices may repeat.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), indices),
            sequences: self
                .sequences
                .iter()
                .map(|t| t.select(Axis(0), indices))
                .collect(),
        }
    }
}

/// A binary classifier that outputs the probability of the positive class.
pub trait BaseModel: Send {
    fn name(&self) -> &str;

    fn fit(&mut self, input: &ModelInput, target: ArrayView1<f64>) -> Result<(), ModelError>;

    fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError>;
}

/// Checks that `target` is a non-empty 0/1 vector matching `n_samples`.
pub(crate) fn check_binary_target(
    target: ArrayView1<f64>,
    n_samples: usize,
) -> Result<(), ModelError> {
    if n_samples == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if target.len() != n_samples {
        return Err(ModelError::SampleCountMismatch {
            expected: n_samples,
            found: target.len(),
        });
    }
    match target.iter().find(|&&y| y != 0.0 && y != 1.0) {
        Some(&bad) => Err(ModelError::NonBinaryTarget(bad)),
        None => Ok(()),
    }
}

pub(crate) fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta.clamp(-700.0, 700.0)).exp())
}
