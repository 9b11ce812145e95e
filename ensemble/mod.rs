//! Base classifiers and the stacked ensemble that blends them.

pub mod adaboost;
pub mod boosting;
pub mod logistic;
pub mod metrics;
pub mod models;
pub mod oversample;
pub mod results;
pub mod sequence_model;
pub mod trainer;
pub mod tree;
