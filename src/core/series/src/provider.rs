use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bundle::SeriesBundle;
use crate::error::SeriesError;
use crate::timeseries::TimeSeries;

/// What the bundle is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// Hold out the last `test_length` points from train/val.
    Training,
    /// Train and val run to the end of the data.
    Predicting,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Training => write!(f, "training"),
            DataMode::Predicting => write!(f, "predicting"),
        }
    }
}

impl FromStr for DataMode {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "training" => Ok(DataMode::Training),
            "predicting" => Ok(DataMode::Predicting),
            other => Err(SeriesError::UnknownMode(other.to_string())),
        }
    }
}

/// Source of the processed series bundle.
pub trait DataProvider {
    /// Produce the five aligned partitions.
    ///
    /// With `binary` set, target values are turned into 0/1 direction labels.
    fn get_series_bundle(&self, mode: DataMode, binary: bool) -> Result<SeriesBundle, SeriesError>;
}

/// Partition lengths used when splitting a full series into a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLengths {
    /// Points in the validation partition.
    #[serde(default = "default_val_length")]
    pub val_length: usize,
    /// Points in the held-out evaluation tail (`PRED_STEPS`).
    #[serde(default = "default_test_length")]
    pub test_length: usize,
    /// History points kept in `test` ahead of the evaluation tail.
    #[serde(default = "default_test_lookback")]
    pub test_lookback: usize,
}

fn default_val_length() -> usize { 60 }
fn default_test_length() -> usize { 20 }
fn default_test_lookback() -> usize { 100 }

impl Default for SplitLengths {
    fn default() -> Self {
        Self {
            val_length: default_val_length(),
            test_length: default_test_length(),
            test_lookback: default_test_lookback(),
        }
    }
}

/// Split a full target series into a bundle.
///
/// # Arguments
/// * `target` - Full target series (labels or raw values)
/// * `past_covariates` - Covariates only known up to each point
/// * `future_covariates` - Covariates known ahead of time
/// * `lengths` - Partition lengths
/// * `mode` - Training holds out the evaluation tail, predicting does not
pub fn split_bundle(
    target: &TimeSeries,
    past_covariates: TimeSeries,
    future_covariates: TimeSeries,
    lengths: &SplitLengths,
    mode: DataMode,
) -> Result<SeriesBundle, SeriesError> {
    let n = target.len();
    let held_out = match mode {
        DataMode::Training => lengths.test_length,
        DataMode::Predicting => 0,
    };
    let required = held_out + lengths.val_length + 1;
    if n < required || n < lengths.test_length {
        return Err(SeriesError::InsufficientData {
            required: required.max(lengths.test_length),
            actual: n,
        });
    }

    let val_end = n - held_out;
    let val_start = val_end - lengths.val_length;
    let test_start = n.saturating_sub(lengths.test_length + lengths.test_lookback);

    let bundle = SeriesBundle {
        train: target.slice(0..val_start),
        val: target.slice(val_start..val_end),
        test: target.slice(test_start..n),
        past_covariates,
        future_covariates,
    };
    bundle.validate(lengths.test_length)?;
    Ok(bundle)
}

/// Calendar covariates (weekday and month, scaled to [0, 1)) for an index.
///
/// These are known ahead of time, so they serve as future covariates when a
/// data source has none.
pub fn calendar_covariates(index: &[crate::Timestamp]) -> Result<TimeSeries, SeriesError> {
    use chrono::Datelike;

    let weekday: Vec<f64> = index
        .iter()
        .map(|ts| ts.weekday().num_days_from_monday() as f64 / 7.0)
        .collect();
    let month: Vec<f64> = index.iter().map(|ts| ts.month0() as f64 / 12.0).collect();
    TimeSeries::from_columns(
        index.to_vec(),
        vec!["weekday".to_string(), "month".to_string()],
        &[weekday, month],
    )
}

/// Turn raw values into up/down labels.
///
/// Row `t` becomes 1.0 when the value rose against row `t - 1`, else 0.0. The
/// first row has no predecessor and is dropped.
pub fn to_direction_labels(series: &TimeSeries) -> Result<TimeSeries, SeriesError> {
    if series.len() < 2 {
        return Err(SeriesError::InsufficientData {
            required: 2,
            actual: series.len(),
        });
    }
    let n_comp = series.n_components();
    let mut values = Vec::with_capacity((series.len() - 1) * n_comp);
    for t in 1..series.len() {
        let prev = series.row(t - 1);
        let cur = series.row(t);
        values.extend(
            cur.iter()
                .zip(prev)
                .map(|(c, p)| if c > p { 1.0 } else { 0.0 }),
        );
    }
    TimeSeries::new(
        series.time_index()[1..].to_vec(),
        series.components().to_vec(),
        values,
    )
}
