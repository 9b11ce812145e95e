#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use hcdr::config::PipelineConfig;
use hcdr::pipeline::{run_test_prediction, run_validation};

#[derive(Parser)]
#[command(
    name = "hcdr",
    about = "Loan default risk estimation with leakage-safe feature assembly",
    long_about = "Assembles one feature record per loan applicant from the application, \
                 bureau and previous-application tables, extracts monthly balance sequences, \
                 and fits a stacked ensemble of classifiers."
)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides the data directory of the configuration
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold out one fold of the training table and report ROC AUC per model
    #[command(about = "Validate on a held-out fold (outputs: results CSV)")]
    Validate {
        /// Where to write the results table
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Fit on every training applicant and predict the test applicants
    #[command(about = "Predict the test applications (outputs: results CSV)")]
    Predict {
        /// Where to write the results table
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    #[command(about = "Print the effective configuration")]
    Config,
}

fn load_config(
    path: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

fn validate(
    config: PipelineConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| config.output.clone());
    let report = run_validation(&config)?;
    if !report.non_informative.is_empty() {
        log::warn!(
            "Models with constant predictions: {}",
            report.non_informative.join(", ")
        );
    }
    for (name, auc) in &report.model_auc {
        match auc {
            Some(auc) => println!("{name}\t{auc:.4}"),
            None => println!("{name}\tn/a"),
        }
    }
    match report.blend_auc {
        Some(auc) => println!("BLEND\t{auc:.4}"),
        None => println!("BLEND\tn/a"),
    }
    report.results.write(&output)?;
    Ok(())
}

fn predict(
    config: PipelineConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| config.output.clone());
    let results = run_test_prediction(&config)?;
    results.write(&output)?;
    Ok(())
}

fn print_config(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        config,
        data_dir,
        command,
    } = Cli::parse();

    let result = match command {
        None => {
            if Cli::command().print_help().is_err() {
                process::exit(1);
            }
            println!();
            Ok(())
        }
        Some(command) => load_config(config.as_deref(), data_dir).and_then(|config| match command {
            Commands::Validate { output } => validate(config, output),
            Commands::Predict { output } => predict(config, output),
            Commands::Config => print_config(config),
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
