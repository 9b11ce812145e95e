//! Run configuration.
//!
//! Every field has a default so an empty TOML file (or no file at all) gives the
//! standard Home Credit setup. Only the fields that differ need to be written.

use crate::ensemble::adaboost::AdaBoostConfig;
use crate::ensemble::boosting::BoostingConfig;
use crate::ensemble::logistic::LogisticConfig;
use crate::impute::SoftImputeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub files: InputFiles,
    pub output: PathBuf,
    pub seed: u64,
    pub validation: ValidationConfig,
    pub assembler: AssemblerConfig,
    pub sequences: Vec<SequenceTableConfig>,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub application_train: String,
    pub application_test: String,
    pub bureau: String,
    pub previous_application: String,
    pub applicant_key: String,
}

/// Shuffled k-fold split of the training table; `fold` is the held-out part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub folds: usize,
    pub fold: usize,
}

/// Column schema and fitted-step settings of the record assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub target_column: String,
    /// Yes/no text columns mapped to 1/0.
    pub flag_columns: Vec<String>,
    /// Numeric housing statistics compressed by PCA.
    pub home_numeric_columns: Vec<String>,
    /// Housing text columns whose indicator families join the PCA input.
    pub home_categorical_columns: Vec<String>,
    pub pca_components: usize,
    pub pca_prefix: String,
    /// Request-count columns filled with zero, except `bureau_request_year_column`.
    pub bureau_request_columns: Vec<String>,
    pub bureau_request_year_column: String,
    pub bureau_request_year_fill: f64,
    pub credit_column: String,
    pub goods_price_column: String,
    pub annuity_column: String,
    pub bureau_suffix: String,
    pub previous_suffix: String,
    /// Identifier columns left out of the per-applicant sums.
    pub bureau_exclude: Vec<String>,
    pub previous_exclude: Vec<String>,
    pub imputer: SoftImputeConfig,
}

/// One time-series table turned into a padded tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceTableConfig {
    pub name: String,
    pub file: String,
    /// Key column of the file. Equal to the applicant key unless a lookup is given.
    pub key_column: String,
    /// File mapping `key_column` to the applicant key (e.g. `bureau.csv`).
    pub lookup_file: Option<String>,
    pub time_column: String,
    pub drop_columns: Vec<String>,
    pub tmax: usize,
    pub standardize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub linear: LogisticConfig,
    pub boosting: BoostingConfig,
    pub adaboost: AdaBoostConfig,
    pub sequence: LogisticConfig,
    pub meta: LogisticConfig,
}

const HOME_STAT_BASES: [&str; 14] = [
    "APARTMENTS",
    "BASEMENTAREA",
    "YEARS_BEGINEXPLUATATION",
    "YEARS_BUILD",
    "COMMONAREA",
    "ELEVATORS",
    "ENTRANCES",
    "FLOORSMAX",
    "FLOORSMIN",
    "LANDAREA",
    "LIVINGAPARTMENTS",
    "LIVINGAREA",
    "NONLIVINGAPARTMENTS",
    "NONLIVINGAREA",
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            files: InputFiles::default(),
            output: PathBuf::from("results.csv"),
            seed: 42,
            validation: ValidationConfig::default(),
            assembler: AssemblerConfig::default(),
            sequences: vec![
                SequenceTableConfig {
                    name: "credit_card".to_string(),
                    file: "credit_card_balance.csv".to_string(),
                    drop_columns: strings(&["SK_ID_PREV"]),
                    ..SequenceTableConfig::default()
                },
                SequenceTableConfig {
                    name: "bureau_balance".to_string(),
                    file: "bureau_balance.csv".to_string(),
                    key_column: "SK_ID_BUREAU".to_string(),
                    lookup_file: Some("bureau.csv".to_string()),
                    ..SequenceTableConfig::default()
                },
                SequenceTableConfig {
                    name: "pos_cash".to_string(),
                    file: "POS_CASH_balance.csv".to_string(),
                    drop_columns: strings(&["SK_ID_PREV"]),
                    ..SequenceTableConfig::default()
                },
            ],
            models: ModelsConfig::default(),
        }
    }
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            application_train: "application_train.csv".to_string(),
            application_test: "application_test.csv".to_string(),
            bureau: "bureau.csv".to_string(),
            previous_application: "previous_application.csv".to_string(),
            applicant_key: "SK_ID_CURR".to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { folds: 4, fold: 3 }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        let mut home_numeric_columns: Vec<String> = HOME_STAT_BASES
            .iter()
            .flat_map(|base| {
                ["_AVG", "_MODE", "_MEDI"]
                    .iter()
                    .map(move |suffix| format!("{base}{suffix}"))
            })
            .collect();
        home_numeric_columns.push("TOTALAREA_MODE".to_string());

        Self {
            target_column: "TARGET".to_string(),
            flag_columns: strings(&["FLAG_OWN_CAR", "FLAG_OWN_REALTY"]),
            home_numeric_columns,
            home_categorical_columns: strings(&[
                "FONDKAPREMONT_MODE",
                "HOUSETYPE_MODE",
                "WALLSMATERIAL_MODE",
                "EMERGENCYSTATE_MODE",
            ]),
            pca_components: 15,
            pca_prefix: "CURR_HOME_".to_string(),
            bureau_request_columns: strings(&[
                "AMT_REQ_CREDIT_BUREAU_HOUR",
                "AMT_REQ_CREDIT_BUREAU_DAY",
                "AMT_REQ_CREDIT_BUREAU_WEEK",
                "AMT_REQ_CREDIT_BUREAU_MON",
                "AMT_REQ_CREDIT_BUREAU_QRT",
                "AMT_REQ_CREDIT_BUREAU_YEAR",
            ]),
            bureau_request_year_column: "AMT_REQ_CREDIT_BUREAU_YEAR".to_string(),
            bureau_request_year_fill: 1.0,
            credit_column: "AMT_CREDIT".to_string(),
            goods_price_column: "AMT_GOODS_PRICE".to_string(),
            annuity_column: "AMT_ANNUITY".to_string(),
            bureau_suffix: "_BUREAU".to_string(),
            previous_suffix: "_PREVIOUS".to_string(),
            bureau_exclude: strings(&["SK_ID_BUREAU"]),
            previous_exclude: strings(&["SK_ID_PREV"]),
            imputer: SoftImputeConfig::default(),
        }
    }
}

impl Default for SequenceTableConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            file: String::new(),
            key_column: "SK_ID_CURR".to_string(),
            lookup_file: None,
            time_column: "MONTHS_BALANCE".to_string(),
            drop_columns: Vec::new(),
            tmax: 60,
            standardize: true,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            linear: LogisticConfig::default(),
            boosting: BoostingConfig::default(),
            adaboost: AdaBoostConfig::default(),
            sequence: LogisticConfig::default(),
            meta: LogisticConfig {
                balanced: true,
                ..LogisticConfig::default()
            },
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file, then checks it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation.folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "validation.folds must be at least 2, got {}",
                self.validation.folds
            )));
        }
        if self.validation.fold >= self.validation.folds {
            return Err(ConfigError::Invalid(format!(
                "validation.fold {} is out of range for {} folds",
                self.validation.fold, self.validation.folds
            )));
        }
        if let Some(table) = self.sequences.iter().find(|s| s.tmax == 0) {
            return Err(ConfigError::Invalid(format!(
                "sequence table '{}' has tmax = 0",
                table.name
            )));
        }
        if self.assembler.imputer.shrinkage_divisor <= 0.0 {
            return Err(ConfigError::Invalid(
                "assembler.imputer.shrinkage_divisor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn path_of(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_describe_the_standard_tables() {
        let config = PipelineConfig::default();
        assert_eq!(config.assembler.home_numeric_columns.len(), 43);
        assert_eq!(config.assembler.pca_components, 15);
        assert_eq!(config.sequences.len(), 3);
        assert!(config.sequences.iter().all(|s| s.tmax == 60));
        assert!(config.models.meta.balanced);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "seed = 7\n[assembler]\npca_components = 3\n[validation]\nfolds = 5\nfold = 0"
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.assembler.pca_components, 3);
        assert_eq!(config.assembler.credit_column, "AMT_CREDIT");
        assert_eq!(config.validation.folds, 5);
    }

    #[test]
    fn serialised_defaults_load_back() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn fold_out_of_range_is_rejected() {
        let mut config = PipelineConfig::default();
        config.validation.fold = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
