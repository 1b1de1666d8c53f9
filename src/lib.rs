//! Hyperparameter search over binary time-series forecasters.
//!
//! A study draws a configuration from a model's search space, builds the
//! model, fits it on the training partition, backtests it over the held-out
//! tail and scores the precision of the thresholded forecasts. Trial
//! outcomes are journaled so an interrupted study can resume.
//!
//! # Modules
//!
//! - `search_space` - Parameter domains, parameter sources and model configurations
//! - `spaces` - Search spaces of the bundled models
//! - `sampler` - Random and TPE samplers
//! - `models` - Forecaster contract, rolling backtest, GBM and mixer models
//! - `evaluator` - Fit, backtest and score one configuration
//! - `study` - Optimization loop and best-trial tracking
//! - `storage` - Study persistence
//! - `report` - Charts and study summaries

pub mod error;
pub mod evaluator;
pub mod models;
pub mod report;
pub mod sampler;
pub mod search_space;
pub mod spaces;
pub mod storage;
pub mod study;

pub use error::{
    AlignmentError, ConfigurationError, ScoringError, StorageError, TrainingError, TrialError,
};
pub use evaluator::{evaluate, Built, Evaluation, EvaluationMode, EvaluatorSettings};
pub use models::{AnyModel, Forecaster, ModelKind, OutputKind};
pub use sampler::{RandomSampler, Sampler, TpeSampler};
pub use search_space::{Domain, FixedParams, ModelConfiguration, ParamSource, ParameterValue};
pub use storage::{InMemoryStorage, JournalStorage, StoredStudy, StudyStorage};
pub use study::{BestTracker, Direction, OptimizationSummary, Study, Trial, TrialProposal, TrialStatus};
