//! Per-applicant grouped sums of satellite tables (bureau, previous applications).

use crate::data::{DataError, dataframe_from_frame, frame_from_dataframe};
use crate::encode::{CategoricalEncoder, EncodeError};
use crate::frame::FrameError;
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Grouping the table failed: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to encode the table before summarising: {0}")]
    Encode(#[from] EncodeError),
}

/// Sums `values` per distinct combination of `keys`, sorted ascending by `keys`.
///
/// Nulls count as zero, so a group whose cells are all null sums to `0.0`.
pub fn sum_by_keys(
    table: LazyFrame,
    keys: &[&str],
    values: &[String],
) -> Result<DataFrame, PolarsError> {
    let by: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let sums: Vec<Expr> = values.iter().map(|v| col(v.as_str()).sum()).collect();
    table
        .group_by(by)
        .agg(sums)
        .sort(keys.to_vec(), SortMultipleOptions::default())
        .collect()
}

/// Encodes the text columns of a satellite table and sums it per `key`.
///
/// Columns named in `exclude` are dropped first when present. The result has
/// one row per distinct key in ascending order.
pub fn summarize_table(
    table: DataFrame,
    key: &str,
    exclude: &[String],
) -> Result<DataFrame, SummarizeError> {
    let rows = table.height();
    let mut frame = frame_from_dataframe(&table, key)?;
    let excluded: Vec<String> = exclude
        .iter()
        .filter(|name| frame.has_column(name))
        .cloned()
        .collect();
    frame.drop_columns(&excluded)?;

    let (encoder, encoded) = CategoricalEncoder::fit_transform(frame)?;
    let values = encoded.column_names();
    let summary = sum_by_keys(dataframe_from_frame(&encoded)?.lazy(), &[key], &values)?;
    log::info!(
        "Summarised {} rows into {} applicants ({} columns, {} categorical families)",
        rows,
        summary.height(),
        values.len(),
        encoder.families().len()
    );
    Ok(summary)
}
