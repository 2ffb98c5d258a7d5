pub mod domain;
pub mod input;
pub mod output;
pub mod prediction;
pub mod utils;
pub mod web;

pub use domain::{ModelHost, OutputRecord, PredictionError, PredictionOutcome, PredictionRequest};
pub use output::{OutputMode, ResultWriter};
pub use prediction::{ModelClient, Predictor, ProgressSink};
