//! # In-Memory Tables
//!
//! `Frame` is the working store of the column-wise feature steps (flag mapping,
//! indicator encoding, gap filling). Row selection, grouping and joins happen on
//! polars tables before and after; see [`crate::data`].
//!
//! A frame carries an integer key per row and an ordered list of named columns
//! that are either numeric (`f64`, with `NaN` marking a missing cell) or text
//! (`Option<String>`). The key is kept out of the column list so that "all
//! columns" always means "all attributes": row-wise missing counts and scaling
//! never see the identifier.

use ahash::AHashMap;
use ndarray::Array2;
use thiserror::Error;

/// Cell storage for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Numeric(_))
    }

    /// True when the cell at `row` is missing (`NaN` or an absent string).
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnData::Numeric(values) => values[row].is_nan(),
            ColumnData::Text(values) => values[row].is_none(),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("The required column '{0}' was not found in the table.")]
    ColumnNotFound(String),

    #[error("Column '{0}' is expected to be numeric but holds text.")]
    NotNumeric(String),

    #[error("Column '{column}' has {found} rows, but the table has {expected}.")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },

    #[error("A column named '{0}' already exists in the table.")]
    DuplicateColumn(String),

    #[error("Matrix has {found} columns, but {expected} column names were given.")]
    MatrixWidthMismatch { found: usize, expected: usize },
}

/// An ordered collection of equally long columns indexed by an integer key.
#[derive(Debug, Clone)]
pub struct Frame {
    index_name: String,
    keys: Vec<i64>,
    columns: Vec<Column>,
    positions: AHashMap<String, usize>,
}

impl Frame {
    pub fn new(index_name: impl Into<String>, keys: Vec<i64>) -> Self {
        Self {
            index_name: index_name.into(),
            keys,
            columns: Vec::new(),
            positions: AHashMap::new(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn height(&self) -> usize {
        self.keys.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn numeric_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.data.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn text_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.data.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.positions
            .get(name)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64], FrameError> {
        match &self.column(name)?.data {
            ColumnData::Numeric(values) => Ok(values),
            ColumnData::Text(_) => Err(FrameError::NotNumeric(name.to_string())),
        }
    }

    pub fn numeric_mut(&mut self, name: &str) -> Result<&mut Vec<f64>, FrameError> {
        let idx = *self
            .positions
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        match &mut self.columns[idx].data {
            ColumnData::Numeric(values) => Ok(values),
            ColumnData::Text(_) => Err(FrameError::NotNumeric(name.to_string())),
        }
    }

    /// Appends a column. Its length must match the number of keys.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        data: ColumnData,
    ) -> Result<(), FrameError> {
        let name = name.into();
        if data.len() != self.height() {
            return Err(FrameError::LengthMismatch {
                column: name,
                found: data.len(),
                expected: self.height(),
            });
        }
        if self.positions.contains_key(&name) {
            return Err(FrameError::DuplicateColumn(name));
        }
        self.positions.insert(name.clone(), self.columns.len());
        self.columns.push(Column { name, data });
        Ok(())
    }

    /// Replaces the cells of an existing column in place, keeping its position.
    pub fn replace_column(&mut self, name: &str, data: ColumnData) -> Result<(), FrameError> {
        if data.len() != self.height() {
            return Err(FrameError::LengthMismatch {
                column: name.to_string(),
                found: data.len(),
                expected: self.height(),
            });
        }
        let idx = *self
            .positions
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        self.columns[idx].data = data;
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column, FrameError> {
        let idx = *self
            .positions
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        let removed = self.columns.remove(idx);
        self.rebuild_positions();
        Ok(removed)
    }

    /// Drops every named column; all of them must exist.
    pub fn drop_columns(&mut self, names: &[String]) -> Result<(), FrameError> {
        for name in names {
            if !self.has_column(name) {
                return Err(FrameError::ColumnNotFound(name.clone()));
            }
        }
        self.columns.retain(|c| !names.contains(&c.name));
        self.rebuild_positions();
        Ok(())
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.name.clone(), idx))
            .collect();
    }

    /// Number of missing cells in each row, across every column.
    pub fn missing_per_row(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.height()];
        for column in &self.columns {
            for (row, count) in counts.iter_mut().enumerate() {
                if column.data.is_missing(row) {
                    *count += 1;
                }
            }
        }
        counts
    }

    /// Copies the named numeric columns into a row-major `[height, names.len()]` matrix.
    pub fn numeric_matrix(&self, names: &[String]) -> Result<Array2<f64>, FrameError> {
        let mut matrix = Array2::zeros((self.height(), names.len()));
        for (j, name) in names.iter().enumerate() {
            let values = self.numeric(name)?;
            for (i, &v) in values.iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        Ok(matrix)
    }

    /// Appends the columns of `matrix` under `names`.
    pub fn push_matrix(
        &mut self,
        names: &[String],
        matrix: &Array2<f64>,
    ) -> Result<(), FrameError> {
        if matrix.ncols() != names.len() {
            return Err(FrameError::MatrixWidthMismatch {
                found: matrix.ncols(),
                expected: names.len(),
            });
        }
        for (name, column) in names.iter().zip(matrix.columns()) {
            self.push_column(name.clone(), ColumnData::Numeric(column.to_vec()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        let mut frame = Frame::new("SK_ID_CURR", vec![10, 20, 30]);
        frame
            .push_column("AMT", ColumnData::Numeric(vec![1.0, f64::NAN, 3.0]))
            .unwrap();
        frame
            .push_column(
                "KIND",
                ColumnData::Text(vec![Some("a".to_string()), None, None]),
            )
            .unwrap();
        frame
    }

    #[test]
    fn missing_counts_cover_numeric_and_text_cells() {
        assert_eq!(sample().missing_per_row(), vec![0, 2, 1]);
    }

    #[test]
    fn push_matrix_appends_named_columns() {
        let mut frame = sample();
        let matrix = ndarray::array![[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]];
        frame
            .push_matrix(&["PC0".to_string(), "PC1".to_string()], &matrix)
            .unwrap();
        assert_eq!(frame.numeric("PC1").unwrap(), &[4.0, 5.0, 6.0]);
        assert!(matches!(
            frame.push_matrix(&["ONLY".to_string()], &matrix),
            Err(FrameError::MatrixWidthMismatch { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn drop_columns_requires_every_name() {
        let mut frame = sample();
        assert!(frame.drop_columns(&["MISSING".to_string()]).is_err());
        frame.drop_columns(&["KIND".to_string()]).unwrap();
        assert_eq!(frame.column_names(), vec!["AMT".to_string()]);
        assert!(frame.has_column("AMT"));
        assert!(!frame.has_column("KIND"));
    }
}
