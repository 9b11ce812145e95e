//! Stacked ensemble: base models on oversampled data, logistic meta-classifier on their outputs.

use super::adaboost::AdaBoost;
use super::boosting::GradientBoosting;
use super::logistic::{LogisticConfig, LogisticModel};
use super::metrics::is_degenerate;
use super::models::{BaseModel, ModelError, ModelInput};
use super::oversample::random_oversample;
use super::sequence_model::SequenceMetaModel;
use crate::config::ModelsConfig;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1};
use std::io::IsTerminal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Base model '{model}' failed: {source}")]
    BaseModel { model: String, source: ModelError },

    #[error("Meta-classifier failed: {0}")]
    Meta(ModelError),

    #[error("The ensemble has no base models.")]
    NoModels,

    #[error("Training input has {inputs} samples, but {targets} targets were given.")]
    SampleCountMismatch { inputs: usize, targets: usize },
}

/// Predictions of one ensemble fit.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub model_names: Vec<String>,
    /// `[n_train, models]`, predicted on the original (not oversampled) training rows.
    pub train_predictions: Array2<f64>,
    /// `[n_eval, models]`.
    pub evaluation_predictions: Array2<f64>,
    pub train_blend: Array1<f64>,
    pub evaluation_blend: Array1<f64>,
    /// Models whose training predictions were constant.
    pub non_informative: Vec<String>,
    /// Intercept followed by one weight per base model.
    pub meta_coefficients: Array1<f64>,
}

pub struct EnsembleTrainer {
    models: Vec<Box<dyn BaseModel>>,
    meta_config: LogisticConfig,
    seed: u64,
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let template = "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

impl EnsembleTrainer {
    pub fn new(models: Vec<Box<dyn BaseModel>>, meta_config: LogisticConfig, seed: u64) -> Self {
        Self {
            models,
            meta_config,
            seed,
        }
    }

    /// The four standard base models: linear, gradient boosting, AdaBoost and
    /// the sequence plus metadata model.
    pub fn standard(config: &ModelsConfig, seed: u64) -> Self {
        let models: Vec<Box<dyn BaseModel>> = vec![
            Box::new(LogisticModel::new("linear", config.linear.clone())),
            Box::new(GradientBoosting::new("gradient_boosting", config.boosting.clone())),
            Box::new(AdaBoost::new("adaboost", config.adaboost.clone())),
            Box::new(SequenceMetaModel::new("sequence", config.sequence.clone())),
        ];
        Self::new(models, config.meta.clone(), seed)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name().to_string()).collect()
    }

    /// Fits every base model and the meta-classifier on `train`, then predicts `evaluation`.
    pub fn fit_predict(
        &mut self,
        train: &ModelInput,
        target: ArrayView1<f64>,
        evaluation: &ModelInput,
    ) -> Result<EnsembleOutcome, EnsembleError> {
        if self.models.is_empty() {
            return Err(EnsembleError::NoModels);
        }
        if train.n_samples() != target.len() {
            return Err(EnsembleError::SampleCountMismatch {
                inputs: train.n_samples(),
                targets: target.len(),
            });
        }

        let resample = random_oversample(target, self.seed);
        let balanced_input = train.select(&resample);
        let balanced_target: Array1<f64> = resample.iter().map(|&i| target[i]).collect();

        let n_models = self.models.len();
        let mut train_predictions = Array2::zeros((train.n_samples(), n_models));
        let mut evaluation_predictions = Array2::zeros((evaluation.n_samples(), n_models));
        let mut non_informative = Vec::new();

        let pb = create_progress_bar(n_models as u64, "Fitting base models");
        for (k, model) in self.models.iter_mut().enumerate() {
            let name = model.name().to_string();
            pb.set_message(format!("Fitting {name}"));
            let wrap = |source| EnsembleError::BaseModel {
                model: name.clone(),
                source,
            };
            model.fit(&balanced_input, balanced_target.view()).map_err(wrap)?;
            let on_train = model.predict(train).map_err(wrap)?;
            let on_evaluation = model.predict(evaluation).map_err(wrap)?;

            if is_degenerate(on_train.view()) {
                log::warn!(
                    "Base model '{}' produced constant training predictions; \
                     its column carries no information.",
                    name
                );
                non_informative.push(name.clone());
            }
            train_predictions.column_mut(k).assign(&on_train);
            evaluation_predictions.column_mut(k).assign(&on_evaluation);
            log::info!("Base model '{}' fitted", name);
            pb.inc(1);
        }
        pb.finish_with_message("Base models fitted");

        let mut meta = LogisticModel::new("meta", self.meta_config.clone());
        meta.fit_matrix(train_predictions.view(), target)
            .map_err(EnsembleError::Meta)?;
        let train_blend = meta
            .predict_matrix(train_predictions.view())
            .map_err(EnsembleError::Meta)?;
        let evaluation_blend = meta
            .predict_matrix(evaluation_predictions.view())
            .map_err(EnsembleError::Meta)?;
        let meta_coefficients = meta.coefficients().cloned().unwrap_or_default();
        log::info!(
            "Meta-classifier weights (intercept first): {:?}",
            meta_coefficients.to_vec()
        );

        Ok(EnsembleOutcome {
            model_names: self.model_names(),
            train_predictions,
            evaluation_predictions,
            train_blend,
            evaluation_blend,
            non_informative,
            meta_coefficients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Predicts the same probability for everyone.
    struct ConstantModel;

    impl BaseModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }

        fn fit(&mut self, _: &ModelInput, _: ArrayView1<f64>) -> Result<(), ModelError> {
            Ok(())
        }

        fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError> {
            Ok(Array1::from_elem(input.n_samples(), 0.3))
        }
    }

    /// Scores the first feature and records how many rows it was fitted on.
    struct CountingModel(Arc<AtomicUsize>);

    impl BaseModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn fit(&mut self, input: &ModelInput, _: ArrayView1<f64>) -> Result<(), ModelError> {
            self.0.store(input.n_samples(), Ordering::SeqCst);
            Ok(())
        }

        fn predict(&self, input: &ModelInput) -> Result<Array1<f64>, ModelError> {
            Ok(input.features.column(0).mapv(|v| v / 3.0))
        }
    }

    fn separable(n: usize) -> (ModelInput, Array1<f64>) {
        let target = Array1::from_shape_fn(n, |i| if i % 4 == 0 { 1.0 } else { 0.0 });
        let features = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { target[i] * 2.0 + (i % 3) as f64 * 0.1 } else { (i % 5) as f64 }
        });
        let sequences = vec![Array3::from_shape_fn((n, 3, 1), |(i, t, _)| {
            if t == 2 { target[i] } else { 0.0 }
        })];
        (ModelInput::new(features, sequences).unwrap(), target)
    }

    #[test]
    fn standard_ensemble_produces_one_column_per_model() {
        let (train, target) = separable(40);
        let (evaluation, labels) = separable(12);
        let mut trainer = EnsembleTrainer::standard(&ModelsConfig::default(), 42);
        let outcome = trainer.fit_predict(&train, target.view(), &evaluation).unwrap();

        assert_eq!(
            outcome.model_names,
            vec!["linear", "gradient_boosting", "adaboost", "sequence"]
        );
        assert_eq!(outcome.train_predictions.dim(), (40, 4));
        assert_eq!(outcome.evaluation_predictions.dim(), (12, 4));
        assert_eq!(outcome.evaluation_blend.len(), 12);
        assert!(outcome.non_informative.is_empty());
        assert!(outcome.evaluation_blend.iter().all(|p| (0.0..=1.0).contains(p)));

        let auc =
            crate::ensemble::metrics::roc_auc(outcome.evaluation_blend.view(), labels.view());
        assert!(auc.is_some_and(|a| a > 0.9));
    }

    #[test]
    fn constant_model_is_flagged_but_not_fatal() {
        let (train, target) = separable(20);
        let models: Vec<Box<dyn BaseModel>> = vec![
            Box::new(ConstantModel),
            Box::new(LogisticModel::new("linear", LogisticConfig::default())),
        ];
        let meta = LogisticConfig {
            balanced: true,
            ..LogisticConfig::default()
        };
        let mut trainer = EnsembleTrainer::new(models, meta, 1);
        let outcome = trainer.fit_predict(&train, target.view(), &train).unwrap();
        assert_eq!(outcome.non_informative, vec!["constant".to_string()]);
        assert_eq!(outcome.train_blend.len(), 20);
    }

    #[test]
    fn oversampling_stays_inside_model_fitting() {
        let (train, target) = separable(40);
        let (evaluation, labels) = separable(12);
        let (evaluation_before, labels_before) = (evaluation.clone(), labels.clone());
        let fitted_rows = Arc::new(AtomicUsize::new(0));
        let models: Vec<Box<dyn BaseModel>> = vec![
            Box::new(CountingModel(Arc::clone(&fitted_rows))),
            Box::new(LogisticModel::new("linear", LogisticConfig::default())),
        ];
        let mut trainer = EnsembleTrainer::new(models, LogisticConfig::default(), 3);
        let outcome = trainer.fit_predict(&train, target.view(), &evaluation).unwrap();

        assert_eq!(evaluation, evaluation_before);
        assert_eq!(labels, labels_before);

        let oversampled = random_oversample(target.view(), 3).len();
        assert_eq!(oversampled, 60);
        assert_eq!(fitted_rows.load(Ordering::SeqCst), oversampled);
        assert_eq!(outcome.train_predictions.nrows(), train.n_samples());
        assert_eq!(outcome.train_blend.len(), train.n_samples());
        assert_eq!(outcome.evaluation_predictions.nrows(), evaluation.n_samples());
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let (train, _) = separable(8);
        let mut trainer = EnsembleTrainer::standard(&ModelsConfig::default(), 0);
        assert!(matches!(
            trainer.fit_predict(&train, array![0.0, 1.0].view(), &train),
            Err(EnsembleError::SampleCountMismatch { inputs: 8, targets: 2 })
        ));
    }
}
