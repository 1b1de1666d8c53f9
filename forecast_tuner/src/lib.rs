//! Command-line front end of `forecast_study`.
//!
//! # Modules
//!
//! - `config` - Experiment configuration (TOML)
//! - `runner` - Data loading, study setup and the optimize/train/report flows

pub mod config;
pub mod runner;

pub use config::{DataConfig, ExperimentConfig, ModelConfig, OutputConfig, SamplerKind, StudyConfig};
pub use runner::{init_logging, load_bundle, open_study, run_optimize, run_report, run_train, training_params};
