//! End-to-end runs: load the tables once, assemble a fold (or the full training
//! table against the test table), fit the ensemble and collect the results.

use crate::assembler::{AssembleError, AssembledSplit, RecordAssembler};
use crate::config::{ConfigError, PipelineConfig, SequenceTableConfig};
use crate::data::{DataError, key_values, load_table};
use crate::ensemble::metrics::roc_auc;
use crate::ensemble::models::{InputShapes, ModelError, ModelInput};
use crate::ensemble::results::{ResultsError, ResultsTable, SplitKind};
use crate::ensemble::trainer::{EnsembleError, EnsembleOutcome, EnsembleTrainer};
use crate::sequence::{SequenceError, SequenceExtractor, SequenceOptions, SequenceSource};
use crate::summarize::{SummarizeError, summarize_table};
use ahash::AHashMap;
use polars::prelude::*;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Preparing a source table failed: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Summarize(#[from] SummarizeError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error("The training table has no '{0}' column.")]
    MissingTarget(String),
    #[error("Cannot split {rows} rows into {folds} folds.")]
    InvalidSplit { rows: usize, folds: usize },
}

/// All inputs of a run, loaded and summarised once.
pub struct SourceTables {
    pub applications: DataFrame,
    pub bureau_summary: DataFrame,
    pub previous_summary: DataFrame,
    pub sequences: Vec<(SequenceSource, SequenceOptions)>,
}

/// Maps each `key_column` value of `owner` to the applicant in its `applicant_key` column.
///
/// Rows without a `key_column` value are skipped.
fn lookup_from(
    owner: &DataFrame,
    key_column: &str,
    applicant_key: &str,
) -> Result<AHashMap<i64, i64>, DataError> {
    let applicants = key_values(owner, applicant_key)?;
    let foreign = owner
        .column(key_column)
        .map_err(|_| DataError::ColumnNotFound(key_column.to_string()))?
        .cast(&DataType::Int64)?;
    Ok(foreign
        .i64()?
        .into_iter()
        .zip(applicants)
        .filter_map(|(key, applicant)| key.map(|k| (k, applicant)))
        .collect())
}

fn load_sequence(
    config: &PipelineConfig,
    table: &SequenceTableConfig,
    bureau: &DataFrame,
) -> Result<(SequenceSource, SequenceOptions), PipelineError> {
    let mut rows = load_table(&config.path_of(&table.file), &table.key_column)?;
    for name in &table.drop_columns {
        rows = rows.drop(name)?;
    }
    let applicant_key = config.files.applicant_key.as_str();
    let applicant_of = match &table.lookup_file {
        None => None,
        Some(file) if *file == config.files.bureau => {
            Some(lookup_from(bureau, &table.key_column, applicant_key)?)
        }
        Some(file) => {
            let owner = load_table(&config.path_of(file), applicant_key)?;
            Some(lookup_from(&owner, &table.key_column, applicant_key)?)
        }
    };
    Ok((
        SequenceSource {
            name: table.name.clone(),
            table: rows,
            key_column: table.key_column.clone(),
            applicant_of,
            time_column: table.time_column.clone(),
        },
        SequenceOptions {
            tmax: table.tmax,
            standardize: table.standardize,
        },
    ))
}

impl SourceTables {
    /// Reads the training applications and every satellite table.
    pub fn load(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let key = &config.files.applicant_key;
        let applications = load_table(&config.path_of(&config.files.application_train), key)?;
        let bureau = load_table(&config.path_of(&config.files.bureau), key)?;
        let previous = load_table(&config.path_of(&config.files.previous_application), key)?;

        let sequences = config
            .sequences
            .iter()
            .map(|table| load_sequence(config, table, &bureau))
            .collect::<Result<Vec<_>, _>>()?;

        let bureau_summary = summarize_table(bureau, key, &config.assembler.bureau_exclude)?;
        let previous_summary =
            summarize_table(previous, key, &config.assembler.previous_exclude)?;
        Ok(Self {
            applications,
            bureau_summary,
            previous_summary,
            sequences,
        })
    }
}

/// Shuffled k-fold partition of `0..n`; each entry is `(train, held_out)`, both ascending.
///
/// The first `n % folds` folds hold one extra row.
pub fn kfold_splits(
    n: usize,
    folds: usize,
    seed: u64,
) -> Result<Vec<(Vec<usize>, Vec<usize>)>, PipelineError> {
    if folds < 2 || n < folds {
        return Err(PipelineError::InvalidSplit { rows: n, folds });
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let mut splits = Vec::with_capacity(folds);
    let mut start = 0;
    for k in 0..folds {
        let size = n / folds + usize::from(k < n % folds);
        let mut held_out = order[start..start + size].to_vec();
        let mut train: Vec<usize> = order[..start]
            .iter()
            .chain(&order[start + size..])
            .copied()
            .collect();
        held_out.sort_unstable();
        train.sort_unstable();
        splits.push((train, held_out));
        start += size;
    }
    Ok(splits)
}

/// Assembled features and model inputs for a training split and an evaluation split.
pub struct PreparedSplits {
    pub train: AssembledSplit,
    pub evaluation: AssembledSplit,
    pub train_input: ModelInput,
    pub evaluation_input: ModelInput,
}

impl PreparedSplits {
    pub fn input_shapes(&self) -> InputShapes {
        self.train_input.input_shapes()
    }
}

fn build_inputs(
    tables: &SourceTables,
    train: AssembledSplit,
    evaluation: AssembledSplit,
) -> Result<PreparedSplits, PipelineError> {
    let mut train_sequences = Vec::with_capacity(tables.sequences.len());
    let mut evaluation_sequences = Vec::with_capacity(tables.sequences.len());
    for (source, options) in &tables.sequences {
        let extractor = SequenceExtractor::fit(source, &train.ids, *options)?;
        train_sequences.push(extractor.extract(source, &train.ids)?);
        evaluation_sequences.push(extractor.extract(source, &evaluation.ids)?);
    }
    let train_input = ModelInput::new(train.features.clone(), train_sequences)?;
    let evaluation_input = ModelInput::new(evaluation.features.clone(), evaluation_sequences)?;
    log::info!("Model input shapes: {:?}", train_input.input_shapes());
    Ok(PreparedSplits {
        train,
        evaluation,
        train_input,
        evaluation_input,
    })
}

/// Fits every transform on `train_rows` and applies it to `validation_rows`.
pub fn prepare_fold(
    tables: &SourceTables,
    config: &PipelineConfig,
    train_rows: &[usize],
    validation_rows: &[usize],
) -> Result<PreparedSplits, PipelineError> {
    let assembler = RecordAssembler::new(
        &tables.applications,
        &config.files.applicant_key,
        &tables.bureau_summary,
        &tables.previous_summary,
        &config.assembler,
    );
    let (state, train) = assembler.fit(train_rows)?;
    let evaluation = assembler.apply(&state, validation_rows)?;
    build_inputs(tables, train, evaluation)
}

/// Fits every transform on the whole training table and applies it to `test_applications`.
pub fn prepare_test(
    tables: &SourceTables,
    test_applications: &DataFrame,
    config: &PipelineConfig,
) -> Result<PreparedSplits, PipelineError> {
    let all_train: Vec<usize> = (0..tables.applications.height()).collect();
    let (state, train) = RecordAssembler::new(
        &tables.applications,
        &config.files.applicant_key,
        &tables.bureau_summary,
        &tables.previous_summary,
        &config.assembler,
    )
    .fit(&all_train)?;

    let all_test: Vec<usize> = (0..test_applications.height()).collect();
    let evaluation = RecordAssembler::new(
        test_applications,
        &config.files.applicant_key,
        &tables.bureau_summary,
        &tables.previous_summary,
        &config.assembler,
    )
    .apply(&state, &all_test)?;
    build_inputs(tables, train, evaluation)
}

/// Validation diagnostics and the results of one fold.
pub struct ValidationReport {
    pub model_auc: Vec<(String, Option<f64>)>,
    pub blend_auc: Option<f64>,
    pub non_informative: Vec<String>,
    pub results: ResultsTable,
}

fn fit_ensemble(
    prepared: &PreparedSplits,
    config: &PipelineConfig,
) -> Result<EnsembleOutcome, PipelineError> {
    let target = prepared
        .train
        .target
        .as_ref()
        .ok_or_else(|| PipelineError::MissingTarget(config.assembler.target_column.clone()))?;
    let mut trainer = EnsembleTrainer::standard(&config.models, config.seed);
    Ok(trainer.fit_predict(&prepared.train_input, target.view(), &prepared.evaluation_input)?)
}

fn collect_results(
    prepared: &PreparedSplits,
    outcome: &EnsembleOutcome,
    config: &PipelineConfig,
    evaluation_kind: SplitKind,
) -> Result<ResultsTable, PipelineError> {
    let mut results = ResultsTable::new(
        config.files.applicant_key.clone(),
        outcome.model_names.clone(),
    );
    results.push_split(
        SplitKind::Train,
        &prepared.train.ids,
        prepared.train.target.as_ref().map(|t| t.view()),
        &outcome.train_predictions,
        &outcome.train_blend,
    )?;
    results.push_split(
        evaluation_kind,
        &prepared.evaluation.ids,
        prepared.evaluation.target.as_ref().map(|t| t.view()),
        &outcome.evaluation_predictions,
        &outcome.evaluation_blend,
    )?;
    Ok(results)
}

/// Validates on one held-out fold of the training table.
pub fn run_validation_on(
    tables: &SourceTables,
    config: &PipelineConfig,
) -> Result<ValidationReport, PipelineError> {
    let splits = kfold_splits(
        tables.applications.height(),
        config.validation.folds,
        config.seed,
    )?;
    let (train_rows, validation_rows) = splits
        .get(config.validation.fold)
        .ok_or(PipelineError::InvalidSplit {
            rows: tables.applications.height(),
            folds: config.validation.folds,
        })?;
    log::info!(
        "Fold {} of {}: {} training rows, {} validation rows",
        config.validation.fold,
        config.validation.folds,
        train_rows.len(),
        validation_rows.len()
    );

    let prepared = prepare_fold(tables, config, train_rows, validation_rows)?;
    let outcome = fit_ensemble(&prepared, config)?;

    let labels = prepared
        .evaluation
        .target
        .as_ref()
        .ok_or_else(|| PipelineError::MissingTarget(config.assembler.target_column.clone()))?;
    let model_auc: Vec<(String, Option<f64>)> = outcome
        .model_names
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let auc = roc_auc(outcome.evaluation_predictions.column(k), labels.view());
            (name.clone(), auc)
        })
        .collect();
    let blend_auc = roc_auc(outcome.evaluation_blend.view(), labels.view());
    for (name, auc) in &model_auc {
        log::info!("Validation ROC AUC {:<20} {}", name, format_auc(*auc));
    }
    log::info!("Validation ROC AUC {:<20} {}", "BLEND", format_auc(blend_auc));

    let results = collect_results(&prepared, &outcome, config, SplitKind::Validation)?;
    Ok(ValidationReport {
        model_auc,
        blend_auc,
        non_informative: outcome.non_informative,
        results,
    })
}

pub fn run_validation(config: &PipelineConfig) -> Result<ValidationReport, PipelineError> {
    let tables = SourceTables::load(config)?;
    run_validation_on(&tables, config)
}

/// Fits on every training row and predicts the test applications.
pub fn run_test_prediction(config: &PipelineConfig) -> Result<ResultsTable, PipelineError> {
    let tables = SourceTables::load(config)?;
    let test_applications = load_table(
        &config.path_of(&config.files.application_test),
        &config.files.applicant_key,
    )?;
    let prepared = prepare_test(&tables, &test_applications, config)?;
    let outcome = fit_ensemble(&prepared, config)?;
    collect_results(&prepared, &outcome, config, SplitKind::Test)
}

fn format_auc(auc: Option<f64>) -> String {
    auc.map(|a| format!("{a:.4}"))
        .unwrap_or_else(|| "n/a (single class)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kfold_partitions_every_row_once() {
        let splits = kfold_splits(10, 4, 42).unwrap();
        assert_eq!(splits.len(), 4);
        let sizes: Vec<usize> = splits.iter().map(|(_, held)| held.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        let mut seen: Vec<usize> = splits.iter().flat_map(|(_, held)| held.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for (train, held) in &splits {
            assert_eq!(train.len() + held.len(), 10);
            assert!(held.iter().all(|r| !train.contains(r)));
        }
    }

    #[test]
    fn kfold_is_reproducible_per_seed() {
        assert_eq!(kfold_splits(20, 4, 7).unwrap(), kfold_splits(20, 4, 7).unwrap());
    }

    #[test]
    fn lookup_skips_rows_without_a_foreign_key() {
        let bureau = df!(
            "SK_ID_CURR" => [1i64, 1, 2],
            "SK_ID_BUREAU" => [Some(10i64), None, Some(12)]
        )
        .unwrap();
        let lookup = lookup_from(&bureau, "SK_ID_BUREAU", "SK_ID_CURR").unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get(&10), Some(&1));
        assert_eq!(lookup.get(&12), Some(&2));
        assert!(matches!(
            lookup_from(&bureau, "SK_ID_PREV", "SK_ID_CURR"),
            Err(DataError::ColumnNotFound(name)) if name == "SK_ID_PREV"
        ));
    }

    #[test]
    fn too_few_rows_for_the_folds_is_an_error() {
        assert!(matches!(
            kfold_splits(3, 4, 0),
            Err(PipelineError::InvalidSplit { rows: 3, folds: 4 })
        ));
    }
}
