use thiserror::Error;

use crate::timeseries::Timestamp;

/// Errors raised while building series or assembling a bundle.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("series shape mismatch: {rows} timestamps x {components} components needs {expected} values, got {actual}")]
    Shape {
        rows: usize,
        components: usize,
        expected: usize,
        actual: usize,
    },

    #[error("series must have at least one component")]
    NoComponents,

    #[error("time index is not strictly increasing at position {position} ({previous} >= {current})")]
    NonMonotonic {
        position: usize,
        previous: Timestamp,
        current: Timestamp,
    },

    #[error("cannot append series: {0}")]
    Append(String),

    #[error("partition '{partition}' has {actual} points, needs at least {required}")]
    PartitionTooShort {
        partition: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("{covariates} does not cover {partition}: missing timestamp {missing}")]
    CovariateCoverage {
        covariates: &'static str,
        partition: &'static str,
        missing: Timestamp,
    },

    #[error("insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("column '{0}' not found in data file")]
    MissingColumn(String),

    #[error("row {row}: {message}")]
    Parse { row: usize, message: String },

    #[error("unknown data mode '{0}' (expected 'training' or 'predicting')")]
    UnknownMode(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
