use std::path::PathBuf;
use thiserror::Error;

use backtesting::MetricsError;
use series::{SeriesError, Timestamp};

/// A search space or configuration that cannot be used.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("parameter '{name}' has invalid bounds: {reason}")]
    InvalidBounds { name: String, reason: String },

    #[error("parameter '{name}': cap {cap} is below the lower bound {low}")]
    CapBelowLower { name: String, low: i64, cap: i64 },

    #[error("parameter '{0}' is missing")]
    MissingParameter(String),

    #[error("parameter '{name}' value {value} is outside its domain")]
    OutOfDomain { name: String, value: String },

    #[error("parameter '{name}' should be {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("unknown model kind '{0}'")]
    UnknownModel(String),
}

/// Failure while fitting a model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("{0} partition is empty")]
    EmptyPartition(&'static str),

    #[error("{covariates} do not cover target timestamp {missing}")]
    CovariateCoverage {
        covariates: &'static str,
        missing: Timestamp,
    },

    #[error("need at least {required} points to form a training sample, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("training diverged: {0}")]
    Diverged(String),
}

/// A forecast window that does not line up with the available data.
#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("start {0} is not in the series index")]
    StartNotFound(Timestamp),

    #[error("{covariates} end before forecast point {at}")]
    CovariatesExhausted {
        covariates: &'static str,
        at: Timestamp,
    },

    #[error("origin at position {position} has {available} points of history, model needs {required}")]
    InsufficientHistory {
        position: usize,
        required: usize,
        available: usize,
    },

    #[error("model is not fitted")]
    NotFitted,

    #[error("{what} width mismatch: model was fitted on {expected}, got {actual}")]
    WidthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("cannot place forecast timestamps: {0}")]
    NoTimeAxis(String),

    #[error("refit at origin failed: {0}")]
    Refit(#[from] TrainingError),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Failure while scoring a backtest against the truth.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("forecast and truth disagree at position {position}: {truth} vs {forecast}")]
    IndexMismatch {
        position: usize,
        truth: Timestamp,
        forecast: Timestamp,
    },

    #[error("forecast has {forecast} points, truth has {truth}")]
    LengthMismatch { truth: usize, forecast: usize },

    #[error("label {value} at position {position} is not 0 or 1")]
    InvalidLabel { position: usize, value: f64 },

    #[error(transparent)]
    Metrics(MetricsError),
}

impl From<MetricsError> for ScoringError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::InvalidLabel { position, value } => {
                ScoringError::InvalidLabel { position, value }
            }
            other => ScoringError::Metrics(other),
        }
    }
}

/// Any error that ends a single trial without stopping the study.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("training: {0}")]
    Training(#[from] TrainingError),

    #[error("alignment: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("scoring: {0}")]
    Scoring(#[from] ScoringError),

    #[error("objective returned non-finite value {0}")]
    NonFinite(f64),

    #[error("{0}")]
    Other(String),
}

/// Persistence failure. Fatal for the study.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt journal {path} at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("study '{0}' already exists")]
    AlreadyExists(String),

    #[error("study '{0}' does not exist")]
    UnknownStudy(String),

    #[error("study '{name}' was created to {stored}, asked to {requested}")]
    DirectionMismatch {
        name: String,
        stored: String,
        requested: String,
    },
}
