//! # Data Loading Module
//!
//! This module is the only place that touches the delimited input files and the
//! only place that moves cells between `polars` and the rest of the crate.
//!
//! - Tables stay as polars `DataFrame`s for the relational work: row selection,
//!   per-key sums and the summary joins all run in polars.
//! - [`frame_from_dataframe`] turns a selected table into a [`Frame`] for the
//!   column-wise feature steps. String columns stay text and every other column
//!   is cast to `f64` with nulls mapped to `NaN`. A string column with no value
//!   at all carries no category, so it is read as an empty numeric column.
//! - [`dataframe_from_frame`] goes the other way and maps `NaN` back to null.
//! - Strict keys: the index column must exist and be complete. A table whose rows
//!   cannot be attributed to an applicant is a user-input error, not something to
//!   silently drop.
//! - No cleaning at load time: missing values are preserved exactly as read so
//!   that the per-row missing count downstream reflects the raw file.

use crate::frame::{ColumnData, Frame, FrameError};
use ndarray::Array2;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Number of leading rows polars inspects to infer column types. The Home Credit
/// tables contain long runs of empty cells, so the default window is too short.
const INFER_SCHEMA_ROWS: usize = 10_000;

/// A comprehensive error type for all data loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),

    #[error("IO error while reading '{path}': {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),

    #[error(
        "The column '{column_name}' could not be converted to the expected type \
         '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },

    #[error("The key column '{column}' has a missing value at data row {row}.")]
    MissingKey { column: String, row: usize },

    #[error("Row index {index} is out of bounds for a table with {height} rows.")]
    RowOutOfBounds { index: usize, height: usize },

    #[error("Failed to assemble the in-memory table: {0}")]
    FrameError(#[from] FrameError),
}

/// Reads a comma-separated file whose rows are keyed by `index_column`.
pub fn load_table(path: &Path, index_column: &str) -> Result<DataFrame, DataError> {
    log::info!("Loading table from '{}'", path.display());

    let file = File::open(path).map_err(|source| DataError::IoError {
        path: path.display().to_string(),
        source,
    })?;

    let df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
                .with_parse_options(CsvParseOptions::default().with_separator(b',')),
        )
        .finish()?;

    // Validates presence and completeness of the key up front.
    key_values(&df, index_column)?;
    log::info!(
        "Loaded '{}': {} rows, {} columns (index '{}')",
        path.display(),
        df.height(),
        df.width(),
        index_column
    );
    Ok(df)
}

/// The rows at `rows`, in that order.
pub fn select_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame, DataError> {
    let height = df.height();
    if let Some(&index) = rows.iter().find(|&&r| r >= height) {
        return Err(DataError::RowOutOfBounds { index, height });
    }
    let indices = IdxCa::from_vec(
        "rows".into(),
        rows.iter().map(|&r| r as IdxSize).collect(),
    );
    Ok(df.take(&indices)?)
}

/// Values of an integer key column; every row must have one.
pub fn key_values(df: &DataFrame, column_name: &str) -> Result<Vec<i64>, DataError> {
    let column = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    let casted = column
        .cast(&DataType::Int64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "i64 (integer key)",
            found_type: format!("{:?}", column.dtype()),
        })?;
    casted
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(row, key)| {
            key.ok_or_else(|| DataError::MissingKey {
                column: column_name.to_string(),
                row: row + 1,
            })
        })
        .collect()
}

/// Cells of a numeric column as `f64`, nulls as `NaN`.
pub fn numeric_values(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let column = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", column.dtype()),
    };
    if column.dtype() == &DataType::String {
        return Err(wrong_type());
    }
    let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Copies the named numeric columns into a row-major `[height, names.len()]` matrix.
pub fn numeric_matrix(df: &DataFrame, names: &[String]) -> Result<Array2<f64>, DataError> {
    let mut matrix = Array2::zeros((df.height(), names.len()));
    for (j, name) in names.iter().enumerate() {
        for (cell, v) in matrix.column_mut(j).iter_mut().zip(numeric_values(df, name)?) {
            *cell = v;
        }
    }
    Ok(matrix)
}

fn is_blank_text(column: &Column) -> bool {
    column.dtype() == &DataType::String
        && column.len() > 0
        && column.null_count() == column.len()
}

/// Converts a materialised `DataFrame` into a [`Frame`] indexed by `index_column`.
pub fn frame_from_dataframe(df: &DataFrame, index_column: &str) -> Result<Frame, DataError> {
    let keys = key_values(df, index_column)?;

    let mut frame = Frame::new(index_column, keys);
    for column in df.get_columns() {
        let name = column.name().to_string();
        if name == index_column {
            continue;
        }
        let data = match column.dtype() {
            DataType::String if is_blank_text(column) => {
                ColumnData::Numeric(vec![f64::NAN; column.len()])
            }
            DataType::String => {
                let values = column.as_materialized_series().str()?;
                ColumnData::Text(values.into_iter().map(|v| v.map(str::to_string)).collect())
            }
            other => {
                let casted =
                    column
                        .cast(&DataType::Float64)
                        .map_err(|_| DataError::ColumnWrongType {
                            column_name: name.clone(),
                            expected_type: "f64 (numeric) or text",
                            found_type: format!("{other:?}"),
                        })?;
                let values = casted.f64()?;
                ColumnData::Numeric(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            }
        };
        frame.push_column(name, data)?;
    }
    Ok(frame)
}

/// Converts a [`Frame`] back into a `DataFrame`; the key becomes an `Int64` column.
pub fn dataframe_from_frame(frame: &Frame) -> Result<DataFrame, DataError> {
    let mut columns = Vec::with_capacity(frame.width() + 1);
    columns.push(Column::new(frame.index_name().into(), frame.keys().to_vec()));
    for column in frame.columns() {
        let name: PlSmallStr = column.name.as_str().into();
        columns.push(match &column.data {
            ColumnData::Numeric(values) => {
                let cells: Vec<Option<f64>> =
                    values.iter().map(|v| (!v.is_nan()).then_some(*v)).collect();
                Column::new(name, cells)
            }
            ColumnData::Text(values) => Column::new(name, values.clone()),
        });
    }
    Ok(DataFrame::new(columns)?)
}
