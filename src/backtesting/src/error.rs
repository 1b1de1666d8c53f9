use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricsError {
    #[error("length mismatch: {truth} labels vs {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },

    #[error("label {value} at position {position} is not 0 or 1")]
    InvalidLabel { position: usize, value: f64 },

    #[error("no samples to score")]
    Empty,
}
