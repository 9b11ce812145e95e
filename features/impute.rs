//! # Low-Rank Completion (soft-impute)
//!
//! Fills missing cells of a numeric matrix with a low-rank reconstruction. The
//! observed cells are never changed.
//!
//! Fitting alternates two steps on the column-centered matrix `Z`:
//!
//! 1. decompose `Z = U S Vᵀ` (through the eigendecomposition of the `p × p` Gram
//!    matrix `ZᵀZ`, which is cheap because `p` is small compared to the row count),
//! 2. shrink every singular value by `λ` and write the reconstruction
//!    `U max(S - λ, 0) Vᵀ` into the missing cells only.
//!
//! The reconstruction equals `Z · P` with `P = V diag(max(s - λ, 0) / s) Vᵀ`, so
//! the last `P` together with the column means is the whole fitted state. New
//! rows are completed by running the same fixed-point iteration with the frozen
//! `P`, which never refits anything.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImputeError {
    #[error("Cannot fit the imputer on an empty matrix ({rows} rows, {columns} columns).")]
    EmptyMatrix { rows: usize, columns: usize },

    #[error("The imputer was fitted on {expected} columns, but the input has {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Eigendecomposition failed during imputation: {0}")]
    Linalg(#[from] LinalgError),
}

/// Tuning of the completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftImputeConfig {
    pub max_iterations: usize,
    /// Relative change of the filled cells below which the iteration stops.
    pub convergence_threshold: f64,
    /// `λ = largest singular value / shrinkage_divisor`.
    pub shrinkage_divisor: f64,
    /// Optional hard cap on the rank kept after shrinkage.
    pub max_rank: Option<usize>,
}

impl Default for SoftImputeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 0.001,
            shrinkage_divisor: 50.0,
            max_rank: None,
        }
    }
}

pub struct SoftImpute {
    config: SoftImputeConfig,
}

/// Frozen completion state.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedSoftImpute {
    means: Array1<f64>,
    operator: Array2<f64>,
    shrinkage: f64,
    rank: usize,
    max_iterations: usize,
    convergence_threshold: f64,
}

mod internal {
    use super::*;

    /// Column means over observed cells. A column without observations takes
    /// the mean of every observed cell, or zero when nothing is observed.
    pub(super) fn observed_means(data: ArrayView2<f64>) -> Array1<f64> {
        let mut total = 0.0;
        let mut count = 0usize;
        let mut means = Array1::from_elem(data.ncols(), f64::NAN);
        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let (sum, n) = column
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
            total += sum;
            count += n;
            if n > 0 {
                means[j] = sum / n as f64;
            }
        }
        let fallback = if count > 0 { total / count as f64 } else { 0.0 };
        means.mapv_inplace(|m| if m.is_nan() { fallback } else { m });
        means
    }

    /// Centers by `means` and sets missing cells to zero (the centered mean).
    pub(super) fn center(
        data: ArrayView2<f64>,
        means: &Array1<f64>,
    ) -> (Array2<f64>, Vec<(usize, usize)>) {
        let mut centered = data.to_owned();
        let mut missing = Vec::new();
        for ((i, j), v) in centered.indexed_iter_mut() {
            if v.is_nan() {
                *v = 0.0;
                missing.push((i, j));
            } else {
                *v -= means[j];
            }
        }
        (centered, missing)
    }

    /// Singular values (descending) and right singular vectors of `z`.
    pub(super) fn right_singular(z: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>), LinalgError> {
        let gram = z.t().dot(z);
        let (eigenvalues, eigenvectors) = gram.eigh(UPLO::Upper)?;
        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));
        let singular = order.iter().map(|&k| eigenvalues[k].max(0.0).sqrt()).collect();
        let vectors = eigenvectors.select(Axis(1), &order);
        Ok((singular, vectors))
    }

    /// `V diag(max(s - λ, 0) / s) Vᵀ`, keeping at most `max_rank` components.
    pub(super) fn shrinkage_operator(
        singular: &[f64],
        vectors: &Array2<f64>,
        lambda: f64,
        max_rank: Option<usize>,
    ) -> (Array2<f64>, usize) {
        let p = vectors.nrows();
        let mut operator = Array2::zeros((p, p));
        let mut rank = 0;
        for (k, &s) in singular.iter().enumerate() {
            if s <= lambda || s <= f64::EPSILON || max_rank.is_some_and(|r| rank >= r) {
                continue;
            }
            let factor = (s - lambda) / s;
            let v = vectors.column(k);
            for a in 0..p {
                for b in 0..p {
                    operator[[a, b]] += factor * v[a] * v[b];
                }
            }
            rank += 1;
        }
        (operator, rank)
    }

    /// Writes `(z · operator)` into the missing cells and returns the change of
    /// those cells relative to their previous norm.
    pub(super) fn refill(
        z: &mut Array2<f64>,
        missing: &[(usize, usize)],
        operator: &Array2<f64>,
    ) -> f64 {
        let reconstruction = z.dot(operator);
        let mut delta = 0.0;
        let mut previous = 0.0;
        for &(i, j) in missing {
            let d = reconstruction[[i, j]] - z[[i, j]];
            delta += d * d;
            previous += z[[i, j]] * z[[i, j]];
            z[[i, j]] = reconstruction[[i, j]];
        }
        if previous > 0.0 {
            delta.sqrt() / previous.sqrt()
        } else if delta > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

impl SoftImpute {
    pub fn new(config: SoftImputeConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, data: ArrayView2<f64>) -> Result<FittedSoftImpute, ImputeError> {
        let (n, p) = data.dim();
        if n == 0 || p == 0 {
            return Err(ImputeError::EmptyMatrix { rows: n, columns: p });
        }
        let means = internal::observed_means(data);
        let (mut z, missing) = internal::center(data, &means);
        log::debug!(
            "Soft-impute fit on {}x{} matrix with {} missing cells",
            n,
            p,
            missing.len()
        );

        let (singular, vectors) = internal::right_singular(&z)?;
        let shrinkage = singular.first().copied().unwrap_or(0.0) / self.config.shrinkage_divisor;
        let (mut operator, mut rank) =
            internal::shrinkage_operator(&singular, &vectors, shrinkage, self.config.max_rank);

        if !missing.is_empty() {
            let mut converged = false;
            for iteration in 1..=self.config.max_iterations {
                let change = internal::refill(&mut z, &missing, &operator);
                let (singular, vectors) = internal::right_singular(&z)?;
                (operator, rank) = internal::shrinkage_operator(
                    &singular,
                    &vectors,
                    shrinkage,
                    self.config.max_rank,
                );
                log::debug!(
                    "Soft-impute iteration {}: relative change {:.3e}, rank {}",
                    iteration,
                    change,
                    rank
                );
                if change < self.config.convergence_threshold {
                    converged = true;
                    break;
                }
            }
            if !converged {
                log::warn!(
                    "Soft-impute did not converge within {} iterations; using the last estimate.",
                    self.config.max_iterations
                );
            }
        }

        Ok(FittedSoftImpute {
            means,
            operator,
            shrinkage,
            rank,
            max_iterations: self.config.max_iterations,
            convergence_threshold: self.config.convergence_threshold,
        })
    }
}

impl FittedSoftImpute {
    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn shrinkage(&self) -> f64 {
        self.shrinkage
    }

    /// Completes `data` with the frozen operator. Observed cells are copied as-is.
    pub fn predict(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ImputeError> {
        if data.ncols() != self.n_features() {
            return Err(ImputeError::DimensionMismatch {
                expected: self.n_features(),
                found: data.ncols(),
            });
        }
        let (mut z, missing) = internal::center(data, &self.means);
        if !missing.is_empty() {
            for _ in 0..self.max_iterations {
                if internal::refill(&mut z, &missing, &self.operator) < self.convergence_threshold {
                    break;
                }
            }
        }
        let mut completed = data.to_owned();
        for &(i, j) in &missing {
            completed[[i, j]] = z[[i, j]] + self.means[j];
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rank_one_with_gaps() -> Array2<f64> {
        // Rows are multiples of (1, 2, 3).
        let mut data = Array2::zeros((8, 3));
        for i in 0..8 {
            let scale = (i + 1) as f64;
            data[[i, 0]] = scale;
            data[[i, 1]] = 2.0 * scale;
            data[[i, 2]] = 3.0 * scale;
        }
        data[[2, 1]] = f64::NAN;
        data[[5, 2]] = f64::NAN;
        data
    }

    #[test]
    fn observed_cells_pass_through_unchanged() {
        let data = rank_one_with_gaps();
        let fitted = SoftImpute::new(SoftImputeConfig::default())
            .fit(data.view())
            .unwrap();
        let completed = fitted.predict(data.view()).unwrap();
        for ((i, j), &v) in data.indexed_iter() {
            if !v.is_nan() {
                assert_eq!(completed[[i, j]], v);
            }
        }
        assert!(completed.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn low_rank_structure_recovers_missing_cells() {
        let data = rank_one_with_gaps();
        let fitted = SoftImpute::new(SoftImputeConfig::default())
            .fit(data.view())
            .unwrap();
        let completed = fitted.predict(data.view()).unwrap();
        // Exact values are 6 and 18; the observed column means are 72/7 and 90/7.
        assert!((completed[[2, 1]] - 6.0).abs() < (72.0 / 7.0 - 6.0_f64).abs());
        assert!((completed[[5, 2]] - 18.0).abs() < (18.0 - 90.0 / 7.0_f64).abs());
        assert_abs_diff_eq!(completed[[2, 1]], 6.0, epsilon = 2.0);
        assert_abs_diff_eq!(completed[[5, 2]], 18.0, epsilon = 2.5);
    }

    #[test]
    fn fully_missing_column_falls_back_to_global_mean() {
        let data = array![[1.0, f64::NAN], [3.0, f64::NAN]];
        let fitted = SoftImpute::new(SoftImputeConfig::default())
            .fit(data.view())
            .unwrap();
        let completed = fitted.predict(data.view()).unwrap();
        assert!(completed.iter().all(|v| v.is_finite()));
        assert_eq!(completed[[0, 0]], 1.0);
    }

    #[test]
    fn predict_does_not_refit() {
        let data = rank_one_with_gaps();
        let fitted = SoftImpute::new(SoftImputeConfig::default())
            .fit(data.view())
            .unwrap();
        let before = fitted.clone();
        let other = array![[f64::NAN, 100.0, 300.0], [50.0, f64::NAN, f64::NAN]];
        fitted.predict(other.view()).unwrap();
        assert_eq!(fitted, before);
    }

    #[test]
    fn column_count_mismatch_is_rejected() {
        let data = rank_one_with_gaps();
        let fitted = SoftImpute::new(SoftImputeConfig::default())
            .fit(data.view())
            .unwrap();
        let narrow = array![[1.0, 2.0]];
        assert!(matches!(
            fitted.predict(narrow.view()),
            Err(ImputeError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn empty_matrix_cannot_be_fitted() {
        let data = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            SoftImpute::new(SoftImputeConfig::default()).fit(data.view()),
            Err(ImputeError::EmptyMatrix { .. })
        ));
    }
}
