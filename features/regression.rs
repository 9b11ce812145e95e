//! Ordinary least squares used to fill dependent amount columns.
//!
//! The fit is done on centered data with a pseudo-inverse of `XᵀX`. Directions
//! with no variance get a zero coefficient, so a single observed row yields a
//! flat model through that row instead of an error.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};
use thiserror::Error;

/// Eigenvalues below `RELATIVE_TOLERANCE * largest` are treated as zero.
const RELATIVE_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error("Cannot fit a regression without any complete observation.")]
    NoObservations,

    #[error("Expected {expected} predictor values, but got {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Linear algebra failure while solving least squares: {0}")]
    Linalg(#[from] LinalgError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

/// Solves `a x = b` for symmetric positive semi-definite `a` with the
/// Moore-Penrose pseudo-inverse.
pub fn solve_symmetric_pseudo_inverse(
    a: &Array2<f64>,
    b: &Array1<f64>,
) -> Result<Array1<f64>, LinalgError> {
    let (eigenvalues, eigenvectors) = a.eigh(UPLO::Upper)?;
    let largest = eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    let cutoff = largest * RELATIVE_TOLERANCE;
    let projected = eigenvectors.t().dot(b);
    let scaled = Array1::from_iter(
        projected
            .iter()
            .zip(eigenvalues.iter())
            .map(|(&c, &lambda)| if lambda > cutoff && lambda > 0.0 { c / lambda } else { 0.0 }),
    );
    Ok(eigenvectors.dot(&scaled))
}

impl LinearRegression {
    /// Fits `y ~ x` on complete rows. The caller filters out missing values.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, RegressionError> {
        if x.nrows() != y.len() {
            return Err(RegressionError::DimensionMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }
        let n = x.nrows();
        if n == 0 {
            return Err(RegressionError::NoObservations);
        }
        let x_mean = x.mean_axis(Axis(0)).ok_or(RegressionError::NoObservations)?;
        let y_mean = y.mean().ok_or(RegressionError::NoObservations)?;
        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let gram = xc.t().dot(&xc);
        let moment = xc.t().dot(&yc);
        let coefficients = solve_symmetric_pseudo_inverse(&gram, &moment)?;
        let intercept = y_mean - x_mean.dot(&coefficients);
        Ok(Self {
            intercept,
            coefficients,
        })
    }

    pub fn n_predictors(&self) -> usize {
        self.coefficients.len()
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64, RegressionError> {
        if row.len() != self.n_predictors() {
            return Err(RegressionError::DimensionMismatch {
                expected: self.n_predictors(),
                found: row.len(),
            });
        }
        Ok(self.intercept
            + row
                .iter()
                .zip(self.coefficients.iter())
                .map(|(x, b)| x * b)
                .sum::<f64>())
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, RegressionError> {
        if x.ncols() != self.n_predictors() {
            return Err(RegressionError::DimensionMismatch {
                expected: self.n_predictors(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}
