//! Forecaster contract, rolling-origin evaluation and the bundled models.
//!
//! # Modules
//!
//! - `gbm` - Leaf-wise gradient-boosted trees over lagged features
//! - `mixer` - Time/feature mixing network trained on focal loss
//! - `artifact` - Saving and loading fitted models

pub mod artifact;
pub mod gbm;
pub mod mixer;
pub mod tree;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use series::{TimeSeries, Timestamp};

use crate::error::{AlignmentError, ConfigurationError, TrainingError};
use crate::search_space::ModelConfiguration;

pub use artifact::{load_model, save_model, SavedModel};
pub use gbm::{GbmModel, GbmParams};
pub use mixer::{MixerModel, MixerParams};

/// What a forecaster's output values mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Values in [0, 1].
    Probability,
    /// Unbounded scores; apply a sigmoid before thresholding.
    Logit,
    /// Raw regression values.
    Value,
}

/// Per-iteration losses recorded while fitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train: Vec<f64>,
    pub val: Vec<f64>,
}

/// Series a model is fitted on.
#[derive(Debug, Clone, Copy)]
pub struct FitData<'a> {
    pub series: &'a TimeSeries,
    pub past_covariates: &'a TimeSeries,
    pub future_covariates: &'a TimeSeries,
    /// Optional validation series, continuing after `series`.
    pub val_series: Option<&'a TimeSeries>,
}

/// History a forecast starts from.
#[derive(Debug, Clone, Copy)]
pub struct ForecastContext<'a> {
    pub series: &'a TimeSeries,
    pub past_covariates: &'a TimeSeries,
    pub future_covariates: &'a TimeSeries,
}

impl<'a> ForecastContext<'a> {
    pub fn with_series(&self, series: &'a TimeSeries) -> Self {
        Self { series, ..*self }
    }
}

/// A trainable forecaster.
pub trait Forecaster {
    fn fit(&mut self, data: &FitData<'_>) -> Result<(), TrainingError>;

    /// Forecast `n` points after the end of `ctx.series`.
    ///
    /// Beyond `output_length` the model feeds its own forecasts back as
    /// history.
    fn predict(&self, n: usize, ctx: &ForecastContext<'_>) -> Result<TimeSeries, AlignmentError>;

    /// Minimum history needed before a forecast origin.
    fn input_length(&self) -> usize;

    /// Points produced per forward pass.
    fn output_length(&self) -> usize;

    fn output_kind(&self) -> OutputKind;

    fn loss_history(&self) -> &LossHistory;

    /// Drop training-only state once the model is no longer being fitted.
    fn release(&mut self) {}
}

/// The model families a study can search over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[serde(alias = "lightgbm")]
    Gbm,
    #[serde(alias = "tsmixer")]
    Mixer,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Gbm => write!(f, "gbm"),
            ModelKind::Mixer => write!(f, "mixer"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gbm" | "lightgbm" => Ok(ModelKind::Gbm),
            "mixer" | "tsmixer" => Ok(ModelKind::Mixer),
            other => Err(ConfigurationError::UnknownModel(other.to_string())),
        }
    }
}

impl ModelKind {
    /// Build an untrained model from a resolved configuration.
    pub fn build(self, config: &ModelConfiguration) -> Result<AnyModel, ConfigurationError> {
        Ok(match self {
            ModelKind::Gbm => AnyModel::Gbm(GbmModel::new(GbmParams::from_config(config)?)),
            ModelKind::Mixer => AnyModel::Mixer(MixerModel::new(MixerParams::from_config(config)?)),
        })
    }
}

/// One of the bundled models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnyModel {
    Gbm(GbmModel),
    Mixer(MixerModel),
}

impl AnyModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            AnyModel::Gbm(_) => ModelKind::Gbm,
            AnyModel::Mixer(_) => ModelKind::Mixer,
        }
    }

    fn inner(&self) -> &dyn Forecaster {
        match self {
            AnyModel::Gbm(m) => m,
            AnyModel::Mixer(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Forecaster {
        match self {
            AnyModel::Gbm(m) => m,
            AnyModel::Mixer(m) => m,
        }
    }
}

impl Forecaster for AnyModel {
    fn fit(&mut self, data: &FitData<'_>) -> Result<(), TrainingError> {
        self.inner_mut().fit(data)
    }

    fn predict(&self, n: usize, ctx: &ForecastContext<'_>) -> Result<TimeSeries, AlignmentError> {
        self.inner().predict(n, ctx)
    }

    fn input_length(&self) -> usize {
        self.inner().input_length()
    }

    fn output_length(&self) -> usize {
        self.inner().output_length()
    }

    fn output_kind(&self) -> OutputKind {
        self.inner().output_kind()
    }

    fn loss_history(&self) -> &LossHistory {
        self.inner().loss_history()
    }

    fn release(&mut self) {
        self.inner_mut().release()
    }
}

/// Checks shared by every `fit`: non-empty partitions and covariates that
/// reach every target timestamp.
pub(crate) fn check_fit_data(data: &FitData<'_>) -> Result<(), TrainingError> {
    if data.series.is_empty() {
        return Err(TrainingError::EmptyPartition("train"));
    }
    let mut targets = vec![data.series];
    if let Some(val) = data.val_series {
        if val.is_empty() {
            return Err(TrainingError::EmptyPartition("val"));
        }
        targets.push(val);
    }
    for series in targets {
        if let Some(missing) = data.past_covariates.first_uncovered(series) {
            return Err(TrainingError::CovariateCoverage {
                covariates: "past covariates",
                missing,
            });
        }
        if let Some(missing) = data.future_covariates.first_uncovered(series) {
            return Err(TrainingError::CovariateCoverage {
                covariates: "future covariates",
                missing,
            });
        }
    }
    Ok(())
}

/// Training series followed by the validation series, when they join up.
pub(crate) fn join_validation(data: &FitData<'_>) -> Option<(TimeSeries, usize)> {
    let val = data.val_series?;
    match data.series.append(val) {
        Ok(joined) => Some((joined, data.series.len())),
        Err(_) => Some((val.clone(), 0)),
    }
}

/// Timestamps of the `n` points following the end of `series`.
///
/// Taken from the future covariates when they extend far enough, then from
/// the past covariates, otherwise extrapolated from the last observed
/// spacing.
pub fn future_timestamps(
    series: &TimeSeries,
    future_covariates: &TimeSeries,
    past_covariates: &TimeSeries,
    n: usize,
) -> Result<Vec<Timestamp>, AlignmentError> {
    let end = series
        .end_time()
        .ok_or_else(|| AlignmentError::NoTimeAxis("empty series".to_string()))?;

    for cov in [future_covariates, past_covariates] {
        let index = cov.time_index();
        let after = index.partition_point(|ts| *ts <= end);
        if index.len() - after >= n {
            return Ok(index[after..after + n].to_vec());
        }
    }

    let idx = series.time_index();
    if idx.len() < 2 {
        return Err(AlignmentError::NoTimeAxis(
            "covariates end with the series and one point gives no spacing".to_string(),
        ));
    }
    let step = idx[idx.len() - 1] - idx[idx.len() - 2];
    Ok((1..=n as i32).map(|k| end + step * k).collect())
}

/// Rolling-origin evaluation.
///
/// Starting at the position of `start` in `ctx.series`, forecast `horizon`
/// points from the history before each origin, keep the last point of each
/// forecast and move the origin forward by `stride`. With `retrain` the
/// model is refit on the history before every origin.
pub fn historical_forecasts<M: Forecaster + ?Sized>(
    model: &mut M,
    ctx: &ForecastContext<'_>,
    start: Timestamp,
    horizon: usize,
    stride: usize,
    retrain: bool,
) -> Result<TimeSeries, AlignmentError> {
    let series = ctx.series;
    let start_pos = series
        .position_of(start)
        .ok_or(AlignmentError::StartNotFound(start))?;
    let horizon = horizon.max(1);
    let stride = stride.max(1);

    let mut index = Vec::new();
    let mut values = Vec::new();
    let mut origin = start_pos;
    while origin + horizon <= series.len() {
        if origin < model.input_length() {
            return Err(AlignmentError::InsufficientHistory {
                position: origin,
                required: model.input_length(),
                available: origin,
            });
        }
        let target_ts = series.time_index()[origin + horizon - 1];
        if ctx.future_covariates.position_of(target_ts).is_none() {
            return Err(AlignmentError::CovariatesExhausted {
                covariates: "future covariates",
                at: target_ts,
            });
        }

        let history = series.slice(0..origin);
        if retrain {
            model.fit(&FitData {
                series: &history,
                past_covariates: ctx.past_covariates,
                future_covariates: ctx.future_covariates,
                val_series: None,
            })?;
        }
        let forecast = model.predict(horizon, &ctx.with_series(&history))?;
        let last = forecast.len() - 1;
        index.push(forecast.time_index()[last]);
        values.extend_from_slice(forecast.row(last));
        origin += stride;
    }
    debug!(points = index.len(), horizon, stride, retrain, "historical forecasts done");

    Ok(TimeSeries::new(index, series.components().to_vec(), values)?)
}
