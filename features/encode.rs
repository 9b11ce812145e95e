//! Categorical indicator encoding with a frozen vocabulary.
//!
//! Text columns are expanded into one `0.0`/`1.0` column per distinct value seen
//! at fit time. Missing text is first replaced with [`UNSPECIFIED`] so that
//! "no value recorded" becomes a category of its own. Numeric columns keep their
//! relative order and the indicator families are appended after them, in the
//! order the text columns appeared.

use crate::frame::{ColumnData, Frame, FrameError};
use thiserror::Error;

/// Sentinel category for missing text cells.
pub const UNSPECIFIED: &str = "Unspecified";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(
        "Column '{0}' holds text but was not seen as a text column when the encoder was fitted."
    )]
    UnfittedTextColumn(String),

    #[error("Column '{0}' was fitted as a text column but is numeric in this table.")]
    ExpectedText(String),
}

/// The recorded values of one text column, in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryFamily {
    pub column: String,
    pub values: Vec<String>,
}

impl CategoryFamily {
    fn indicator_name(&self, value: &str) -> String {
        format!("{}_{}", self.column, value)
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.values.iter().map(|v| self.indicator_name(v)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoricalEncoder {
    families: Vec<CategoryFamily>,
}

impl CategoricalEncoder {
    /// Records the vocabulary of every text column of `frame`.
    pub fn fit(frame: &Frame) -> Self {
        let families = frame
            .columns()
            .iter()
            .filter_map(|column| match &column.data {
                ColumnData::Text(cells) => {
                    let mut values: Vec<String> = Vec::new();
                    for cell in cells {
                        let value = cell.as_deref().unwrap_or(UNSPECIFIED);
                        if !values.iter().any(|v| v == value) {
                            values.push(value.to_string());
                        }
                    }
                    Some(CategoryFamily {
                        column: column.name.clone(),
                        values,
                    })
                }
                ColumnData::Numeric(_) => None,
            })
            .collect();
        Self { families }
    }

    pub fn families(&self) -> &[CategoryFamily] {
        &self.families
    }

    /// Indicator column names produced for `column`, empty if it is not a fitted text column.
    pub fn indicator_names_for(&self, column: &str) -> Vec<String> {
        self.families
            .iter()
            .find(|f| f.column == column)
            .map(CategoryFamily::indicator_names)
            .unwrap_or_default()
    }

    /// Replaces every fitted text column by its indicator family.
    ///
    /// Values that were not recorded at fit time leave the whole family at zero
    /// for that row. A fitted column that arrives numeric with every cell
    /// missing (an all-blank CSV column) is read as all-missing text.
    pub fn transform(&self, mut frame: Frame) -> Result<Frame, EncodeError> {
        for column in frame.columns() {
            if !column.data.is_numeric() && !self.families.iter().any(|f| f.column == column.name)
            {
                return Err(EncodeError::UnfittedTextColumn(column.name.clone()));
            }
        }
        if self.families.is_empty() {
            return Ok(frame);
        }

        let height = frame.height();
        for family in &self.families {
            let cells = match frame.remove_column(&family.column)?.data {
                ColumnData::Text(cells) => cells,
                ColumnData::Numeric(values) if values.iter().all(|v| v.is_nan()) => {
                    vec![None; values.len()]
                }
                ColumnData::Numeric(_) => {
                    return Err(EncodeError::ExpectedText(family.column.clone()));
                }
            };
            let mut indicators = vec![vec![0.0; height]; family.values.len()];
            for (row, cell) in cells.iter().enumerate() {
                let value = cell.as_deref().unwrap_or(UNSPECIFIED);
                if let Some(k) = family.values.iter().position(|v| v == value) {
                    indicators[k][row] = 1.0;
                }
            }
            for (value, column) in family.values.iter().zip(indicators) {
                frame.push_column(family.indicator_name(value), ColumnData::Numeric(column))?;
            }
        }
        log::debug!(
            "Encoded {} text columns into {} total columns",
            self.families.len(),
            frame.width()
        );
        Ok(frame)
    }

    pub fn fit_transform(frame: Frame) -> Result<(Self, Frame), EncodeError> {
        let encoder = Self::fit(&frame);
        let encoded = encoder.transform(frame)?;
        Ok((encoder, encoded))
    }
}
