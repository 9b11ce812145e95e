//! Fixed-length per-applicant tensors from monthly balance tables.
//!
//! Rows are attributed to an applicant either directly (the table key is the
//! applicant ID) or through a lookup (e.g. bureau balance rows keyed by
//! `SK_ID_BUREAU`). All rows of one applicant and one time step are summed into a
//! single step vector. The most recent `tmax` steps are kept in chronological
//! order and shorter histories are padded with zero rows at the front.

use crate::data::{
    DataError, dataframe_from_frame, frame_from_dataframe, key_values, numeric_matrix,
    select_rows,
};
use crate::encode::{CategoricalEncoder, EncodeError};
use crate::frame::{Frame, FrameError};
use crate::scaler::FittedScaler;
use crate::summarize::sum_by_keys;
use ahash::{AHashMap, AHashSet};
use ndarray::{Array2, Array3};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Summing sequence steps failed: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to encode sequence table '{table}': {source}")]
    Encode { table: String, source: EncodeError },

    #[error("Sequence table '{0}' must keep at least one time step (tmax = 0).")]
    ZeroLength(String),
}

/// A time-series table and how its rows map to applicants.
#[derive(Debug, Clone)]
pub struct SequenceSource {
    pub name: String,
    pub table: DataFrame,
    pub key_column: String,
    /// Maps `key_column` to the applicant ID. `None` when the key already is the applicant ID.
    pub applicant_of: Option<AHashMap<i64, i64>>,
    pub time_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceOptions {
    pub tmax: usize,
    pub standardize: bool,
}

/// Vocabulary and scaling fitted on training applicants.
#[derive(Debug, Clone)]
pub struct SequenceExtractor {
    name: String,
    options: SequenceOptions,
    encoder: CategoricalEncoder,
    feature_names: Vec<String>,
    scaler: FittedScaler,
}

impl SequenceSource {
    fn applicant(&self, key: i64) -> Option<i64> {
        match &self.applicant_of {
            Some(lookup) => lookup.get(&key).copied(),
            None => Some(key),
        }
    }

    /// Rows of the table whose applicant is in `ids`, keyed by that applicant.
    fn rows_for(&self, ids: &[i64]) -> Result<Frame, SequenceError> {
        let wanted: AHashSet<i64> = ids.iter().copied().collect();
        let (rows, applicants): (Vec<usize>, Vec<i64>) =
            key_values(&self.table, &self.key_column)?
                .into_iter()
                .enumerate()
                .filter_map(|(row, key)| {
                    self.applicant(key)
                        .filter(|a| wanted.contains(a))
                        .map(|a| (row, a))
                })
                .unzip();
        let mut selected = select_rows(&self.table, &rows)?;
        selected.with_column(Column::new(self.key_column.as_str().into(), applicants))?;
        Ok(frame_from_dataframe(&selected, &self.key_column)?)
    }
}

impl SequenceExtractor {
    pub fn fit(
        source: &SequenceSource,
        train_ids: &[i64],
        options: SequenceOptions,
    ) -> Result<Self, SequenceError> {
        if options.tmax == 0 {
            return Err(SequenceError::ZeroLength(source.name.clone()));
        }
        let rows = source.rows_for(train_ids)?;
        let encoder = CategoricalEncoder::fit(&rows);
        let encoded = encoder.transform(rows).map_err(|e| SequenceError::Encode {
            table: source.name.clone(),
            source: e,
        })?;
        let feature_names: Vec<String> = encoded
            .column_names()
            .into_iter()
            .filter(|name| *name != source.time_column)
            .collect();

        let mut extractor = Self {
            name: source.name.clone(),
            options,
            encoder,
            scaler: FittedScaler::identity(feature_names.len()),
            feature_names,
        };
        if options.standardize {
            let (_, steps) = extractor.sum_steps(encoded, &source.time_column)?;
            extractor.scaler = FittedScaler::fit(steps.view());
        }
        log::info!(
            "Sequence '{}': {} features, tmax {}, fitted on {} applicants",
            extractor.name,
            extractor.feature_names.len(),
            options.tmax,
            train_ids.len()
        );
        Ok(extractor)
    }

    /// `(tmax, features)` of one applicant's tensor.
    pub fn input_shape(&self) -> (usize, usize) {
        (self.options.tmax, self.feature_names.len())
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Sums encoded rows per (applicant, rounded time step).
    ///
    /// Returns the applicant of every step and the step matrix, ordered by
    /// applicant and then chronologically.
    fn sum_steps(
        &self,
        mut encoded: Frame,
        time_column: &str,
    ) -> Result<(Vec<i64>, Array2<f64>), SequenceError> {
        let mut skipped = 0usize;
        for time in encoded.numeric_mut(time_column)?.iter_mut() {
            if time.is_nan() {
                skipped += 1;
            } else {
                *time = time.round();
            }
        }
        if skipped > 0 {
            log::warn!(
                "Sequence '{}': ignored {} rows without a '{}' value",
                self.name,
                skipped,
                time_column
            );
        }

        let key = encoded.index_name().to_string();
        let rows = dataframe_from_frame(&encoded)?
            .lazy()
            .filter(col(time_column).is_not_null());
        let steps = sum_by_keys(rows, &[key.as_str(), time_column], &self.feature_names)?;
        Ok((
            key_values(&steps, &key)?,
            numeric_matrix(&steps, &self.feature_names)?,
        ))
    }

    /// `[ids.len(), tmax, features]` in the order of `ids`.
    pub fn extract(
        &self,
        source: &SequenceSource,
        ids: &[i64],
    ) -> Result<Array3<f64>, SequenceError> {
        let rows = source.rows_for(ids)?;
        let encoded = self.encoder.transform(rows).map_err(|e| SequenceError::Encode {
            table: source.name.clone(),
            source: e,
        })?;
        let (applicants, steps) = self.sum_steps(encoded, &source.time_column)?;

        let mut histories: AHashMap<i64, Vec<usize>> = AHashMap::new();
        for (row, applicant) in applicants.into_iter().enumerate() {
            histories.entry(applicant).or_default().push(row);
        }

        let (tmax, width) = self.input_shape();
        let mut tensor = Array3::zeros((ids.len(), tmax, width));
        for (i, id) in ids.iter().enumerate() {
            let Some(history) = histories.get(id) else {
                continue;
            };
            let kept = &history[history.len().saturating_sub(tmax)..];
            let offset = tmax - kept.len();
            for (t, &row) in kept.iter().enumerate() {
                for (j, &v) in steps.row(row).iter().enumerate() {
                    let scaled = (v - self.scaler.mean[j]) / self.scaler.scale[j];
                    tensor[[i, offset + t, j]] = if scaled.is_nan() { 0.0 } else { scaled };
                }
            }
        }
        log::debug!(
            "Sequence '{}': extracted tensor of shape {:?}",
            self.name,
            tensor.dim()
        );
        Ok(tensor)
    }
}
