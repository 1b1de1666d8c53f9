//! Time-indexed series, the partitioned series bundle and the providers that
//! produce it.
//!
//! # Modules
//!
//! - `timeseries` - Strictly monotonic, multi-component time series
//! - `bundle` - The train/val/test/covariate partition set and its invariants
//! - `provider` - Data provider contract and split lengths
//! - `csv_source` - CSV-backed provider
//! - `synthetic` - Seeded synthetic provider used by tests and demos

pub mod bundle;
pub mod csv_source;
pub mod error;
pub mod provider;
pub mod synthetic;
pub mod timeseries;

pub use bundle::SeriesBundle;
pub use csv_source::{CsvDataProvider, CsvLayout};
pub use error::SeriesError;
pub use provider::{
    calendar_covariates, split_bundle, to_direction_labels, DataMode, DataProvider, SplitLengths,
};
pub use synthetic::SyntheticDataProvider;
pub use timeseries::{TimeSeries, Timestamp};
