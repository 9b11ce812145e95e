//! The canonical results table written by every pipeline path.
//!
//! Columns: `SK_ID_CURR,split,TARGET,<one column per base model>,BLEND`. The
//! `TARGET` cell is empty when the label is unknown (test rows).

use ndarray::{Array1, Array2, ArrayView1};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Failed to write results file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error while writing results: {0}")]
    Csv(#[from] csv::Error),
    #[error("Results for split '{split}' have {found} rows in '{what}', expected {expected}.")]
    LengthMismatch {
        split: SplitKind,
        what: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("Prediction matrix has {found} model columns, but {expected} models are named.")]
    ModelCountMismatch { found: usize, expected: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Train,
    Validation,
    Test,
}

impl fmt::Display for SplitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SplitKind::Train => "train",
            SplitKind::Validation => "validation",
            SplitKind::Test => "test",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub id: i64,
    pub split: SplitKind,
    pub target: Option<f64>,
    pub predictions: Vec<f64>,
    pub blend: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    id_column: String,
    model_names: Vec<String>,
    records: Vec<ResultRecord>,
}

impl ResultsTable {
    pub fn new(id_column: impl Into<String>, model_names: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            model_names,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec![self.id_column.clone(), "split".to_string(), "TARGET".to_string()];
        header.extend(self.model_names.iter().cloned());
        header.push("BLEND".to_string());
        header
    }

    /// Appends one row per applicant of a split.
    pub fn push_split(
        &mut self,
        split: SplitKind,
        ids: &[i64],
        target: Option<ArrayView1<f64>>,
        predictions: &Array2<f64>,
        blend: &Array1<f64>,
    ) -> Result<(), ResultsError> {
        let expected = ids.len();
        let check = |what: &'static str, found: usize| {
            if found == expected {
                Ok(())
            } else {
                Err(ResultsError::LengthMismatch {
                    split,
                    what,
                    found,
                    expected,
                })
            }
        };
        check("predictions", predictions.nrows())?;
        check("blend", blend.len())?;
        if let Some(target) = &target {
            check("target", target.len())?;
        }
        if predictions.ncols() != self.model_names.len() {
            return Err(ResultsError::ModelCountMismatch {
                found: predictions.ncols(),
                expected: self.model_names.len(),
            });
        }

        for (row, &id) in ids.iter().enumerate() {
            self.records.push(ResultRecord {
                id,
                split,
                target: target.as_ref().map(|t| t[row]),
                predictions: predictions.row(row).to_vec(),
                blend: blend[row],
            });
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<(), ResultsError> {
        let file = File::create(path).map_err(|source| ResultsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(self.header())?;
        for record in &self.records {
            let mut fields = vec![
                record.id.to_string(),
                record.split.to_string(),
                record.target.map(|t| t.to_string()).unwrap_or_default(),
            ];
            fields.extend(record.predictions.iter().map(|p| p.to_string()));
            fields.push(record.blend.to_string());
            writer.write_record(&fields)?;
        }
        writer.flush().map_err(|source| ResultsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Wrote {} result rows to '{}'", self.records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    #[test]
    fn writes_one_schema_for_labelled_and_unlabelled_rows() {
        let models = vec!["linear".to_string(), "gbc".to_string()];
        let mut table = ResultsTable::new("SK_ID_CURR", models);
        table
            .push_split(
                SplitKind::Validation,
                &[11],
                Some(array![1.0].view()),
                &array![[0.25, 0.75]],
                &array![0.5],
            )
            .unwrap();
        table
            .push_split(SplitKind::Test, &[12], None, &array![[0.1, 0.2]], &array![0.3])
            .unwrap();

        let file = NamedTempFile::new().unwrap();
        table.write(file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "SK_ID_CURR,split,TARGET,linear,gbc,BLEND");
        assert_eq!(lines[1], "11,validation,1,0.25,0.75,0.5");
        assert_eq!(lines[2], "12,test,,0.1,0.2,0.3");
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut table = ResultsTable::new("SK_ID_CURR", vec!["linear".to_string()]);
        let err = table
            .push_split(SplitKind::Train, &[1, 2], None, &array![[0.1]], &array![0.1, 0.2])
            .unwrap_err();
        assert!(matches!(err, ResultsError::LengthMismatch { what: "predictions", .. }));
    }
}
