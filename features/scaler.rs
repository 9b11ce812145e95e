//! Column standardisation with frozen statistics.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Per-column mean and population standard deviation.
///
/// Missing cells are ignored while fitting and pass through `transform` as
/// missing. A column without variance (or without observations) gets scale 1.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl FittedScaler {
    pub fn fit(data: ArrayView2<f64>) -> Self {
        let p = data.ncols();
        let mut mean = Array1::zeros(p);
        let mut scale = Array1::ones(p);
        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if observed.is_empty() {
                continue;
            }
            let n = observed.len() as f64;
            let m = observed.iter().sum::<f64>() / n;
            let variance = observed.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean[j] = m;
            let std = variance.sqrt();
            scale[j] = if std > 0.0 && std.is_finite() { std } else { 1.0 };
        }
        Self { mean, scale }
    }

    /// Leaves values unchanged.
    pub fn identity(n_features: usize) -> Self {
        Self {
            mean: Array1::zeros(n_features),
            scale: Array1::ones(n_features),
        }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardises `data`; the caller guarantees the column count matches.
    pub fn transform(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            column.mapv_inplace(|v| (v - m) / s);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardises_with_population_std() {
        let data = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = FittedScaler::fit(data.view());
        assert_abs_diff_eq!(scaler.mean[0], 2.0);
        assert_abs_diff_eq!(scaler.scale[0], 1.0);
        assert_abs_diff_eq!(scaler.scale[1], 1.0, epsilon = 0.0);
        let out = scaler.transform(data.view());
        assert_abs_diff_eq!(out[[0, 0]], -1.0);
        assert_abs_diff_eq!(out[[1, 0]], 1.0);
        assert_abs_diff_eq!(out[[0, 1]], 0.0);
    }

    #[test]
    fn missing_cells_are_ignored_and_preserved() {
        let data = array![[f64::NAN], [2.0], [4.0]];
        let scaler = FittedScaler::fit(data.view());
        assert_abs_diff_eq!(scaler.mean[0], 3.0);
        let out = scaler.transform(data.view());
        assert!(out[[0, 0]].is_nan());
    }

    #[test]
    fn identity_is_a_no_op() {
        let data = array![[7.0, -2.0]];
        let out = FittedScaler::identity(2).transform(data.view());
        assert_eq!(out, data);
    }
}
