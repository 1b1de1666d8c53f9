pub mod error;
pub mod metrics;
pub mod models;
pub mod report;

pub use error::MetricsError;
pub use metrics::{
    binarize, classification_report, confusion, precision, recall, sigmoid, validate_labels,
};
pub use models::{ClassificationReport, ConfusionCounts};
