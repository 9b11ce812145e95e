#![deny(dead_code)]
#![deny(unused_variables)]

//! Loan default risk estimation.
//!
//! The crate turns the Home Credit style tables (applications, bureau records,
//! previous applications and monthly balance histories) into fixed-width feature
//! matrices and padded sequence tensors, then blends several base classifiers
//! with a logistic meta-classifier.
//!
//! Every statistic that shapes features is fitted on a training split only and
//! frozen in a [`assembler::FittedTransformState`] that is applied unchanged to
//! validation and test rows.

pub mod assembler;
pub mod data;
pub mod encode;
pub mod frame;
pub mod impute;
pub mod pca;
pub mod pipeline;
pub mod regression;
pub mod scaler;
pub mod sequence;
pub mod summarize;

#[path = "../ensemble/mod.rs"]
pub mod ensemble;

#[path = "../shared/config.rs"]
pub mod config;
