//! Principal component projection for the home-statistic family.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("PCA needs at least 2 rows to estimate a covariance, but got {0}.")]
    TooFewSamples(usize),

    #[error("Requested {requested} principal components from only {available} columns.")]
    ComponentsExceedFeatures { requested: usize, available: usize },

    #[error("The projection was fitted on {expected} columns, but the input has {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Eigendecomposition of the covariance matrix failed: {0}")]
    Linalg(#[from] LinalgError),
}

/// Mean and leading eigenvectors of the training covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedPca {
    mean: Array1<f64>,
    /// `[n_features, n_components]`, columns ordered by decreasing variance.
    rotation: Array2<f64>,
    explained_variance: Array1<f64>,
}

impl FittedPca {
    /// Fits `n_components` directions on a complete (NaN-free) matrix.
    ///
    /// Each component's sign is fixed so that its largest-magnitude loading is
    /// positive, which makes repeated fits on the same data give the same output.
    pub fn fit(data: ArrayView2<f64>, n_components: usize) -> Result<Self, ProjectionError> {
        let (n, p) = data.dim();
        if n < 2 {
            return Err(ProjectionError::TooFewSamples(n));
        }
        if n_components > p {
            return Err(ProjectionError::ComponentsExceedFeatures {
                requested: n_components,
                available: p,
            });
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or(ProjectionError::TooFewSamples(n))?;
        let centered = &data - &mean;
        let covariance = centered.t().dot(&centered) / (n as f64 - 1.0);
        let (eigenvalues, eigenvectors) = covariance.eigh(UPLO::Upper)?;

        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));
        order.truncate(n_components);

        let mut rotation = eigenvectors.select(Axis(1), &order);
        for mut component in rotation.columns_mut() {
            let pivot = component
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                component.mapv_inplace(|v| -v);
            }
        }
        let explained_variance = order.iter().map(|&k| eigenvalues[k].max(0.0)).collect();

        log::debug!("PCA fitted: {} columns -> {} components", p, n_components);
        Ok(Self {
            mean,
            rotation,
            explained_variance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.rotation.ncols()
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ProjectionError> {
        if data.ncols() != self.mean.len() {
            return Err(ProjectionError::DimensionMismatch {
                expected: self.mean.len(),
                found: data.ncols(),
            });
        }
        Ok((&data - &self.mean).dot(&self.rotation))
    }
}
