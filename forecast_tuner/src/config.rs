//! Experiment configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use forecast_study::{Direction, EvaluatorSettings, ModelKind};
use series::{CsvLayout, SplitLengths};

/// Main configuration of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Where the series come from
    pub data: DataConfig,

    /// Study identity, storage and sampler
    #[serde(default)]
    pub study: StudyConfig,

    /// Model family to search
    #[serde(default)]
    pub model: ModelConfig,

    /// Fit/backtest/score settings
    #[serde(default)]
    pub evaluation: EvaluatorSettings,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Data source of the series bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DataConfig {
    /// Wide CSV file with a date column
    Csv {
        path: PathBuf,
        layout: CsvLayout,
        #[serde(default)]
        split: SplitLengths,
        #[serde(default = "default_binary")]
        binary: bool,
    },
    /// Seeded random walks
    Synthetic {
        #[serde(default = "default_n_points")]
        n_points: usize,
        #[serde(default = "default_n_targets")]
        n_targets: usize,
        #[serde(default = "default_data_seed")]
        seed: u64,
        #[serde(default)]
        split: SplitLengths,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    Tpe,
    Random,
}

/// Study configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_study_name")]
    pub name: String,

    /// Directory holding the study journals
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_n_trials")]
    pub n_trials: usize,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default = "default_sampler")]
    pub sampler: SamplerKind,

    /// Sampler seed
    #[serde(default = "default_sampler_seed")]
    pub seed: u64,
}

/// Model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_kind")]
    pub kind: ModelKind,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for reports and charts
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Write PNG charts of the backtest and losses
    #[serde(default)]
    pub plot: bool,

    /// Default log level: error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_binary() -> bool { true }
fn default_n_points() -> usize { 800 }
fn default_n_targets() -> usize { 1 }
fn default_data_seed() -> u64 { 7 }
fn default_study_name() -> String { "forecast-precision".to_string() }
fn default_storage_dir() -> PathBuf { PathBuf::from("studies") }
fn default_n_trials() -> usize { 50 }
fn default_sampler() -> SamplerKind { SamplerKind::Tpe }
fn default_sampler_seed() -> u64 { 42 }
fn default_model_kind() -> ModelKind { ModelKind::Gbm }
fn default_output_dir() -> PathBuf { PathBuf::from("results") }
fn default_log_level() -> String { "info".to_string() }

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            name: default_study_name(),
            storage_dir: default_storage_dir(),
            n_trials: default_n_trials(),
            direction: Direction::default(),
            sampler: default_sampler(),
            seed: default_sampler_seed(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: default_model_kind(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            plot: false,
            log_level: default_log_level(),
        }
    }
}

impl DataConfig {
    pub fn split(&self) -> &SplitLengths {
        match self {
            DataConfig::Csv { split, .. } | DataConfig::Synthetic { split, .. } => split,
        }
    }
}

impl ExperimentConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let eval = &self.evaluation;
        if eval.pred_steps == 0 {
            anyhow::bail!("evaluation.pred_steps must be greater than 0");
        }
        if !(0.0..1.0).contains(&eval.threshold) {
            anyhow::bail!("evaluation.threshold must be in [0, 1), got {}", eval.threshold);
        }

        let split = self.data.split();
        if split.test_length < eval.pred_steps {
            anyhow::bail!(
                "data.split.test_length ({}) must cover evaluation.pred_steps ({})",
                split.test_length,
                eval.pred_steps
            );
        }
        if split.val_length == 0 {
            anyhow::bail!("data.split.val_length must be greater than 0");
        }

        match &self.data {
            DataConfig::Csv { layout, .. } if layout.target_columns.is_empty() => {
                anyhow::bail!("data.layout.target_columns must name at least one column");
            }
            DataConfig::Synthetic { n_points, n_targets, .. } => {
                if *n_targets == 0 {
                    anyhow::bail!("data.n_targets must be greater than 0");
                }
                let needed = split.val_length + split.test_length + split.test_lookback + 2;
                if *n_points < needed {
                    anyhow::bail!("data.n_points must be at least {needed}, got {n_points}");
                }
            }
            DataConfig::Csv { .. } => {}
        }

        if self.study.name.trim().is_empty() {
            anyhow::bail!("study.name must not be empty");
        }
        if self.study.n_trials == 0 {
            anyhow::bail!("study.n_trials must be greater than 0");
        }
        if self.output.log_level.parse::<tracing::Level>().is_err() {
            anyhow::bail!("output.log_level '{}' is not a log level", self.output.log_level);
        }
        Ok(())
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ExperimentConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}
