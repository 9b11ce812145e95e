//! # Record Assembler
//!
//! Builds the fixed-width feature matrix of one split of the application table.
//!
//! Every statistic that shapes the output (category vocabulary, imputer operator,
//! PCA rotation, the two amount regressions, fill means, scaler) is learned by
//! [`RecordAssembler::fit`] on the training rows and returned as a
//! [`FittedTransformState`]. [`RecordAssembler::apply`] replays the same steps
//! with that state and never learns anything, so validation and test rows cannot
//! leak into the features of the training rows.
//!
//! Steps, in order:
//!
//! 1. select the split's rows,
//! 2. count missing cells per raw row (`NA_COLS`),
//! 3. map yes/no flags to 1/0,
//! 4. expand text columns into indicators,
//! 5. complete the housing statistics with soft-impute,
//! 6. replace them by their principal components,
//! 7. fill the credit bureau request counts,
//! 8. predict missing goods prices from the credit amount,
//! 9. predict missing annuities from credit amount and goods price,
//! 10. fill the remaining gaps with training means,
//! 11. attach the bureau and previous-application summaries,
//! 12. split off the label and standardise.

use crate::config::AssemblerConfig;
use crate::data::{
    DataError, dataframe_from_frame, frame_from_dataframe, key_values, numeric_matrix,
    numeric_values, select_rows,
};
use crate::encode::{CategoricalEncoder, EncodeError};
use crate::frame::{ColumnData, Frame, FrameError};
use crate::impute::{FittedSoftImpute, ImputeError, SoftImpute};
use crate::pca::{FittedPca, ProjectionError};
use crate::regression::{LinearRegression, RegressionError};
use crate::scaler::FittedScaler;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use thiserror::Error;

/// Name of the derived per-row missing count.
pub const NA_COLS: &str = "NA_COLS";

/// Temporary column that carries the split's row order through the summary joins.
const ROW_ORDER: &str = "hcdr_row_order";

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Joining the summary tables failed: {0}")]
    Polars(#[from] PolarsError),

    #[error("Categorical encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Imputation of the housing statistics failed: {0}")]
    Impute(#[from] ImputeError),

    #[error("Projection of the housing statistics failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Amount regression failed: {0}")]
    Regression(#[from] RegressionError),

    #[error(
        "The fold assembler must be fitted on a training split before transforming other rows."
    )]
    NotFitted,

    #[error("The training split has no '{0}' column to learn from.")]
    MissingTarget(String),

    #[error(
        "Assembled columns do not match the fitted feature order \
         (expected {expected} columns, found {found}; first difference: {first_difference})."
    )]
    FeatureMismatch {
        expected: usize,
        found: usize,
        first_difference: String,
    },

    #[error("Internal error: fit step '{0}' did not record its state.")]
    IncompleteState(&'static str),
}

/// The assembled features of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledSplit {
    pub ids: Vec<i64>,
    pub feature_names: Vec<String>,
    /// `[ids.len(), feature_names.len()]`, standardised.
    pub features: Array2<f64>,
    /// Present when the source table carries the label column.
    pub target: Option<Array1<f64>>,
}

/// Everything learned from a training split.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedTransformState {
    pub encoder: CategoricalEncoder,
    /// Resolved PCA input columns (numeric statistics and indicator families).
    pub home_columns: Vec<String>,
    pub imputer: FittedSoftImpute,
    pub pca: FittedPca,
    /// `None` when the training split had no row with both amounts observed.
    pub goods_price_model: Option<LinearRegression>,
    pub annuity_model: Option<LinearRegression>,
    /// Columns that still had gaps after the regressions, with their training means.
    pub mean_fill: Vec<(String, f64)>,
    pub scaler: FittedScaler,
    pub feature_names: Vec<String>,
}

#[derive(Default)]
struct PartialState {
    encoder: Option<CategoricalEncoder>,
    home_columns: Option<Vec<String>>,
    imputer: Option<FittedSoftImpute>,
    pca: Option<FittedPca>,
    goods_price_model: Option<Option<LinearRegression>>,
    annuity_model: Option<Option<LinearRegression>>,
    mean_fill: Option<Vec<(String, f64)>>,
    scaler: Option<FittedScaler>,
    feature_names: Option<Vec<String>>,
}

impl PartialState {
    fn finish(self) -> Result<FittedTransformState, AssembleError> {
        Ok(FittedTransformState {
            encoder: self.encoder.ok_or(AssembleError::IncompleteState("encoder"))?,
            home_columns: self
                .home_columns
                .ok_or(AssembleError::IncompleteState("home columns"))?,
            imputer: self.imputer.ok_or(AssembleError::IncompleteState("imputer"))?,
            pca: self.pca.ok_or(AssembleError::IncompleteState("pca"))?,
            goods_price_model: self
                .goods_price_model
                .ok_or(AssembleError::IncompleteState("goods price regression"))?,
            annuity_model: self
                .annuity_model
                .ok_or(AssembleError::IncompleteState("annuity regression"))?,
            mean_fill: self
                .mean_fill
                .ok_or(AssembleError::IncompleteState("mean fill"))?,
            scaler: self.scaler.ok_or(AssembleError::IncompleteState("scaler"))?,
            feature_names: self
                .feature_names
                .ok_or(AssembleError::IncompleteState("feature names"))?,
        })
    }
}

/// Whether a step learns its statistics or replays fitted ones.
enum Pass<'s> {
    Fit(&'s mut PartialState),
    Apply(&'s FittedTransformState),
}

/// Source tables and schema shared by every split of one run.
pub struct RecordAssembler<'a> {
    applications: &'a DataFrame,
    key: &'a str,
    bureau_summary: &'a DataFrame,
    previous_summary: &'a DataFrame,
    config: &'a AssemblerConfig,
}

impl<'a> RecordAssembler<'a> {
    /// `key` names the applicant column shared by the application table and both summaries.
    pub fn new(
        applications: &'a DataFrame,
        key: &'a str,
        bureau_summary: &'a DataFrame,
        previous_summary: &'a DataFrame,
        config: &'a AssemblerConfig,
    ) -> Self {
        Self {
            applications,
            key,
            bureau_summary,
            previous_summary,
            config,
        }
    }

    /// Learns the transform state from the rows at `rows` and returns their features.
    pub fn fit(
        &self,
        rows: &[usize],
    ) -> Result<(FittedTransformState, AssembledSplit), AssembleError> {
        log::info!("Fitting feature transforms on {} training rows", rows.len());
        let mut partial = PartialState::default();
        let split = self.run(rows, Pass::Fit(&mut partial))?;
        Ok((partial.finish()?, split))
    }

    /// Assembles the rows at `rows` with a previously fitted state.
    pub fn apply(
        &self,
        state: &FittedTransformState,
        rows: &[usize],
    ) -> Result<AssembledSplit, AssembleError> {
        log::info!("Applying fitted feature transforms to {} rows", rows.len());
        self.run(rows, Pass::Apply(state))
    }

    fn run(&self, rows: &[usize], mut pass: Pass<'_>) -> Result<AssembledSplit, AssembleError> {
        let config = self.config;

        // 1-2
        let selected = select_rows(self.applications, rows)?;
        let mut frame = frame_from_dataframe(&selected, self.key)?;
        let missing: Vec<f64> = frame
            .missing_per_row()
            .into_iter()
            .map(|c| c as f64)
            .collect();
        frame.push_column(NA_COLS, ColumnData::Numeric(missing))?;

        // 3
        for flag in &config.flag_columns {
            map_yes_no(&mut frame, flag)?;
        }

        // 4
        let mut frame = match &mut pass {
            Pass::Fit(partial) => {
                let (encoder, encoded) = CategoricalEncoder::fit_transform(frame)?;
                partial.encoder = Some(encoder);
                encoded
            }
            Pass::Apply(state) => state.encoder.transform(frame)?,
        };

        // 5-6
        self.project_home_statistics(&mut frame, &mut pass)?;

        // 7
        for column in &config.bureau_request_columns {
            let fill = if *column == config.bureau_request_year_column {
                config.bureau_request_year_fill
            } else {
                0.0
            };
            fill_column(&mut frame, column, fill)?;
        }

        // 8-9
        let credit = config.credit_column.as_str();
        let goods = config.goods_price_column.as_str();
        let annuity = config.annuity_column.as_str();
        match &mut pass {
            Pass::Fit(partial) => {
                let goods_model = fit_regression(&frame, &[credit], goods)?;
                apply_regression(&mut frame, goods_model.as_ref(), &[credit], goods)?;
                let annuity_model = fit_regression(&frame, &[credit, goods], annuity)?;
                apply_regression(
                    &mut frame,
                    annuity_model.as_ref(),
                    &[credit, goods],
                    annuity,
                )?;
                partial.goods_price_model = Some(goods_model);
                partial.annuity_model = Some(annuity_model);
            }
            Pass::Apply(state) => {
                apply_regression(
                    &mut frame,
                    state.goods_price_model.as_ref(),
                    &[credit],
                    goods,
                )?;
                apply_regression(
                    &mut frame,
                    state.annuity_model.as_ref(),
                    &[credit, goods],
                    annuity,
                )?;
            }
        }

        // 10
        let means = match &mut pass {
            Pass::Fit(partial) => {
                let means = column_means_with_gaps(&frame, &config.target_column)?;
                partial.mean_fill = Some(means.clone());
                means
            }
            Pass::Apply(state) => state.mean_fill.clone(),
        };
        for (column, mean) in &means {
            fill_column(&mut frame, column, *mean)?;
        }

        // 11
        let joined = self.join_summaries(&frame)?;
        let feature_names: Vec<String> = joined
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != self.key && name.as_str() != config.target_column)
            .map(|name| name.to_string())
            .collect();
        let gaps = feature_names
            .iter()
            .map(|name| joined.column(name).map(|c| c.null_count()))
            .sum::<PolarsResult<usize>>()?;
        log::debug!("Zero-filling {} cells after joining the summaries", gaps);
        let joined = joined
            .lazy()
            .with_columns(
                feature_names
                    .iter()
                    .map(|name| col(name.as_str()).fill_null(lit(0.0)))
                    .collect::<Vec<_>>(),
            )
            .collect()?;

        // 12
        let target = if joined.column(&config.target_column).is_ok() {
            Some(Array1::from(numeric_values(&joined, &config.target_column)?))
        } else {
            None
        };
        let raw = numeric_matrix(&joined, &feature_names)?;
        let features = match &mut pass {
            Pass::Fit(partial) => {
                if target.is_none() {
                    return Err(AssembleError::MissingTarget(config.target_column.clone()));
                }
                let scaler = FittedScaler::fit(raw.view());
                let features = scaler.transform(raw.view());
                partial.scaler = Some(scaler);
                partial.feature_names = Some(feature_names.clone());
                features
            }
            Pass::Apply(state) => {
                check_feature_order(&state.feature_names, &feature_names)?;
                state.scaler.transform(raw.view())
            }
        };
        log::info!(
            "Assembled {} rows x {} features",
            features.nrows(),
            features.ncols()
        );

        Ok(AssembledSplit {
            ids: key_values(&joined, self.key)?,
            feature_names,
            features,
            target,
        })
    }

    /// Step 11: left-joins both summaries on the applicant key, keeping the row order.
    ///
    /// Summary columns whose name is already taken get the table's suffix, and
    /// applicants without a summary row are left null.
    fn join_summaries(&self, frame: &Frame) -> Result<DataFrame, AssembleError> {
        let left_join = |suffix: &str| JoinArgs {
            how: JoinType::Left,
            suffix: Some(suffix.into()),
            ..Default::default()
        };
        let joined = dataframe_from_frame(frame)?
            .lazy()
            .with_row_index(ROW_ORDER, None)
            .join(
                self.bureau_summary.clone().lazy(),
                [col(self.key)],
                [col(self.key)],
                left_join(&self.config.bureau_suffix),
            )
            .join(
                self.previous_summary.clone().lazy(),
                [col(self.key)],
                [col(self.key)],
                left_join(&self.config.previous_suffix),
            )
            .sort([ROW_ORDER], SortMultipleOptions::default())
            .collect()?;
        Ok(joined.drop(ROW_ORDER)?)
    }

    /// Steps 5 and 6: complete the housing family and swap it for its components.
    fn project_home_statistics(
        &self,
        frame: &mut Frame,
        pass: &mut Pass<'_>,
    ) -> Result<(), AssembleError> {
        let columns = match pass {
            Pass::Fit(partial) => {
                let encoder = partial
                    .encoder
                    .as_ref()
                    .ok_or(AssembleError::IncompleteState("encoder"))?;
                let columns = resolve_home_columns(frame, encoder, self.config)?;
                partial.home_columns = Some(columns.clone());
                columns
            }
            Pass::Apply(state) => state.home_columns.clone(),
        };
        let raw = frame.numeric_matrix(&columns)?;

        let completed = match pass {
            Pass::Fit(partial) => {
                let imputer = SoftImpute::new(self.config.imputer.clone()).fit(raw.view())?;
                log::info!(
                    "Housing statistics: {} columns completed with rank {} (shrinkage {:.4})",
                    columns.len(),
                    imputer.rank(),
                    imputer.shrinkage()
                );
                let completed = imputer.predict(raw.view())?;
                partial.imputer = Some(imputer);
                completed
            }
            Pass::Apply(state) => state.imputer.predict(raw.view())?,
        };

        let scores = match pass {
            Pass::Fit(partial) => {
                let pca = FittedPca::fit(completed.view(), self.config.pca_components)?;
                let scores = pca.transform(completed.view())?;
                partial.pca = Some(pca);
                scores
            }
            Pass::Apply(state) => state.pca.transform(completed.view())?,
        };

        frame.drop_columns(&columns)?;
        let names: Vec<String> = (0..scores.ncols())
            .map(|i| format!("{}{}", self.config.pca_prefix, i))
            .collect();
        frame.push_matrix(&names, &scores)?;
        Ok(())
    }
}

/// Declared numeric statistics followed by the indicator families of the
/// declared housing text columns.
fn resolve_home_columns(
    frame: &Frame,
    encoder: &CategoricalEncoder,
    config: &AssemblerConfig,
) -> Result<Vec<String>, AssembleError> {
    let mut columns = Vec::new();
    for name in &config.home_numeric_columns {
        if !frame.has_column(name) {
            return Err(FrameError::ColumnNotFound(name.clone()).into());
        }
        columns.push(name.clone());
    }
    for name in &config.home_categorical_columns {
        let indicators = encoder.indicator_names_for(name);
        if !indicators.is_empty() {
            columns.extend(indicators);
        } else if frame.has_column(name) {
            // Read as numeric because it had no text values.
            columns.push(name.clone());
        } else {
            return Err(FrameError::ColumnNotFound(name.clone()).into());
        }
    }
    Ok(columns)
}

/// `Y` becomes 1 and `N` becomes 0. Anything else is missing.
fn map_yes_no(frame: &mut Frame, column: &str) -> Result<(), AssembleError> {
    let cells = match &frame.column(column)?.data {
        ColumnData::Text(cells) => cells,
        ColumnData::Numeric(_) => return Ok(()),
    };
    let mut unexpected = 0usize;
    let mapped: Vec<f64> = cells
        .iter()
        .map(|cell| match cell.as_deref() {
            Some("Y") => 1.0,
            Some("N") => 0.0,
            Some(_) => {
                unexpected += 1;
                f64::NAN
            }
            None => f64::NAN,
        })
        .collect();
    if unexpected > 0 {
        log::warn!(
            "Column '{}': {} values other than Y/N were treated as missing",
            column,
            unexpected
        );
    }
    frame.replace_column(column, ColumnData::Numeric(mapped))?;
    Ok(())
}

fn fill_column(frame: &mut Frame, column: &str, value: f64) -> Result<(), AssembleError> {
    for v in frame.numeric_mut(column)?.iter_mut().filter(|v| v.is_nan()) {
        *v = value;
    }
    Ok(())
}

/// Least squares of `response` on `predictors` over rows where all are observed.
fn fit_regression(
    frame: &Frame,
    predictors: &[&str],
    response: &str,
) -> Result<Option<LinearRegression>, AssembleError> {
    let y = frame.numeric(response)?;
    let xs = predictors
        .iter()
        .map(|p| frame.numeric(p))
        .collect::<Result<Vec<_>, _>>()?;
    let complete: Vec<usize> = (0..frame.height())
        .filter(|&i| !y[i].is_nan() && xs.iter().all(|x| !x[i].is_nan()))
        .collect();
    if complete.is_empty() {
        log::warn!(
            "No training row has '{}' and all of {:?} observed; \
             its gaps fall through to mean filling",
            response,
            predictors
        );
        return Ok(None);
    }
    let x = Array2::from_shape_fn((complete.len(), xs.len()), |(r, j)| xs[j][complete[r]]);
    let target = Array1::from_iter(complete.iter().map(|&i| y[i]));
    let model = LinearRegression::fit(x.view(), target.view())?;
    log::debug!(
        "Regression of '{}' on {:?}: intercept {:.4}, coefficients {:?}",
        response,
        predictors,
        model.intercept,
        model.coefficients.to_vec()
    );
    Ok(Some(model))
}

/// Predicts `response` where it is missing and every predictor is observed.
fn apply_regression(
    frame: &mut Frame,
    model: Option<&LinearRegression>,
    predictors: &[&str],
    response: &str,
) -> Result<(), AssembleError> {
    let Some(model) = model else {
        return Ok(());
    };
    let xs: Vec<Vec<f64>> = predictors
        .iter()
        .map(|p| frame.numeric(p).map(<[f64]>::to_vec))
        .collect::<Result<_, _>>()?;
    let mut filled = 0usize;
    let mut row = vec![0.0; xs.len()];
    let values = frame.numeric_mut(response)?;
    for (i, v) in values.iter_mut().enumerate() {
        if !v.is_nan() {
            continue;
        }
        for (slot, x) in row.iter_mut().zip(&xs) {
            *slot = x[i];
        }
        if row.iter().any(|x| x.is_nan()) {
            continue;
        }
        *v = model.predict_row(&row)?;
        filled += 1;
    }
    log::debug!("Filled {} missing '{}' values by regression", filled, response);
    Ok(())
}

/// Observed means of every numeric column (except `target`) that still has gaps.
fn column_means_with_gaps(
    frame: &Frame,
    target: &str,
) -> Result<Vec<(String, f64)>, AssembleError> {
    let mut means = Vec::new();
    for name in frame.numeric_column_names() {
        if name == target {
            continue;
        }
        let values = frame.numeric(&name)?;
        if !values.iter().any(|v| v.is_nan()) {
            continue;
        }
        let (sum, n) = values
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
        let mean = if n > 0 {
            sum / n as f64
        } else {
            log::warn!(
                "Column '{}' has no observed training value; filling with 0",
                name
            );
            0.0
        };
        means.push((name, mean));
    }
    Ok(means)
}

fn check_feature_order(expected: &[String], found: &[String]) -> Result<(), AssembleError> {
    if expected == found {
        return Ok(());
    }
    let first_difference = expected
        .iter()
        .zip(found)
        .find(|(e, f)| e != f)
        .map(|(e, f)| format!("expected '{e}', found '{f}'"))
        .unwrap_or_else(|| "one list is a prefix of the other".to_string());
    Err(AssembleError::FeatureMismatch {
        expected: expected.len(),
        found: found.len(),
        first_difference,
    })
}

/// Keeps the fitted state of one fold between `fit_transform` and `transform`.
pub struct FoldAssembler<'a> {
    assembler: RecordAssembler<'a>,
    state: Option<FittedTransformState>,
}

impl<'a> FoldAssembler<'a> {
    pub fn new(assembler: RecordAssembler<'a>) -> Self {
        Self {
            assembler,
            state: None,
        }
    }

    pub fn fit_transform(&mut self, rows: &[usize]) -> Result<AssembledSplit, AssembleError> {
        let (state, split) = self.assembler.fit(rows)?;
        self.state = Some(state);
        Ok(split)
    }

    pub fn transform(&self, rows: &[usize]) -> Result<AssembledSplit, AssembleError> {
        let state = self.state.as_ref().ok_or(AssembleError::NotFitted)?;
        self.assembler.apply(state, rows)
    }

    pub fn state(&self) -> Option<&FittedTransformState> {
        self.state.as_ref()
    }
}
