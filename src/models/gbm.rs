//! Gradient-boosted trees over lagged target and covariate features.
//!
//! One booster is trained per output step and target component. The
//! features for a forecast of position `origin + h` are:
//!
//! - the target at `origin - 1 ..= origin - lags`
//! - the past covariates at `origin - 1 ..= origin - lags_past_covariates`
//! - the future covariates at `origin + h + l` for `l` in `[0, -1, -2]`

use serde::{Deserialize, Serialize};
use tracing::debug;

use series::{TimeSeries, Timestamp};

use super::tree::{train_booster, Booster, BoostingConfig, Dataset, Loss};
use super::{
    check_fit_data, future_timestamps, join_validation, FitData, ForecastContext, Forecaster,
    LossHistory, OutputKind,
};
use crate::error::{AlignmentError, ConfigurationError, TrainingError};
use crate::search_space::ModelConfiguration;
use crate::spaces::GBM_FUTURE_LAGS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub lags: usize,
    pub lags_past_covariates: usize,
    pub output_chunk_length: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub n_estimators: usize,
    pub min_child_samples: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub objective: Loss,
    pub random_state: u64,
    pub reg_lambda: f64,
    pub max_bin: usize,
    pub early_stopping_rounds: usize,
}

fn out_of_domain(name: &str, value: impl ToString) -> ConfigurationError {
    ConfigurationError::OutOfDomain {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn unit_fraction(config: &ModelConfiguration, name: &str) -> Result<f64, ConfigurationError> {
    let v = config.float_or(name, 1.0)?;
    if v <= 0.0 || v > 1.0 {
        return Err(out_of_domain(name, v));
    }
    Ok(v)
}

impl GbmParams {
    pub fn from_config(config: &ModelConfiguration) -> Result<Self, ConfigurationError> {
        let objective = match config.text_or("objective", "binary")? {
            "binary" => Loss::Logistic,
            "regression" | "l2" => Loss::Squared,
            other => return Err(out_of_domain("objective", other)),
        };
        let learning_rate = config.get_float("learning_rate")?;
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(out_of_domain("learning_rate", learning_rate));
        }
        let reg_lambda = config.float_or("reg_lambda", 0.0)?;
        if reg_lambda < 0.0 {
            return Err(out_of_domain("reg_lambda", reg_lambda));
        }
        Ok(Self {
            lags: config.get_usize("lags", 1)?,
            lags_past_covariates: config.get_usize("lags_past_covariates", 1)?,
            output_chunk_length: config.get_usize("output_chunk_length", 1)?,
            learning_rate,
            num_leaves: config.get_usize("num_leaves", 2)?,
            n_estimators: config.get_usize("n_estimators", 1)?,
            min_child_samples: config.get_usize("min_child_samples", 1)?,
            subsample: unit_fraction(config, "subsample")?,
            colsample_bytree: unit_fraction(config, "colsample_bytree")?,
            objective,
            random_state: config.usize_or("random_state", 42)? as u64,
            reg_lambda,
            max_bin: config.usize_or("max_bin", 63)?,
            early_stopping_rounds: config.usize_or("early_stopping_rounds", 25)?,
        })
    }

    fn boosting(&self, step: usize, component: usize) -> BoostingConfig {
        BoostingConfig {
            learning_rate: self.learning_rate,
            n_estimators: self.n_estimators,
            num_leaves: self.num_leaves,
            min_child_samples: self.min_child_samples,
            subsample: self.subsample,
            colsample_bytree: self.colsample_bytree,
            reg_lambda: self.reg_lambda,
            max_bin: self.max_bin,
            early_stopping_rounds: self.early_stopping_rounds,
            seed: self.random_state.wrapping_add((step * 1000 + component) as u64),
        }
    }

    /// Earliest forecast origin with a full feature window.
    fn min_origin(&self) -> usize {
        let deepest_future_lag = GBM_FUTURE_LAGS.iter().map(|l| l.unsigned_abs() as usize).max().unwrap_or(0);
        self.lags.max(self.lags_past_covariates).max(deepest_future_lag)
    }
}

/// Target history plus the time axis, extended past the end on forecasting.
struct Frame<'a> {
    target: Vec<f64>,
    n_comp: usize,
    times: Vec<Timestamp>,
    past: &'a TimeSeries,
    future: &'a TimeSeries,
}

/// Covariate series and timestamp a feature lookup missed.
type Missing = (&'static str, Timestamp);

impl<'a> Frame<'a> {
    fn new(series: &TimeSeries, past: &'a TimeSeries, future: &'a TimeSeries) -> Self {
        Self {
            target: series.values().to_vec(),
            n_comp: series.n_components(),
            times: series.time_index().to_vec(),
            past,
            future,
        }
    }

    fn n_rows(&self) -> usize {
        self.target.len() / self.n_comp
    }

    fn target_row(&self, pos: usize) -> &[f64] {
        &self.target[pos * self.n_comp..(pos + 1) * self.n_comp]
    }

    fn features(&self, params: &GbmParams, origin: usize, h: usize, out: &mut Vec<f64>) -> Result<(), Missing> {
        for k in 1..=params.lags {
            out.extend_from_slice(self.target_row(origin - k));
        }
        for k in 1..=params.lags_past_covariates {
            let ts = self.times[origin - k];
            let row = self.past.row_at(ts).ok_or(("past covariates", ts))?;
            out.extend_from_slice(row);
        }
        for lag in GBM_FUTURE_LAGS {
            let pos = (origin + h) as i64 + lag;
            let ts = self.times[pos as usize];
            let row = self.future.row_at(ts).ok_or(("future covariates", ts))?;
            out.extend_from_slice(row);
        }
        Ok(())
    }

    /// Samples whose target position `origin + h` lies in `targets`.
    fn samples(
        &self,
        params: &GbmParams,
        h: usize,
        targets: std::ops::Range<usize>,
    ) -> Result<(Vec<f64>, Vec<Vec<f64>>), Missing> {
        let mut x = Vec::new();
        let mut y = vec![Vec::new(); self.n_comp];
        let first = targets.start.max(params.min_origin() + h);
        for pos in first..targets.end.min(self.n_rows()) {
            self.features(params, pos - h, h, &mut x)?;
            for (c, col) in y.iter_mut().enumerate() {
                col.push(self.target_row(pos)[c]);
            }
        }
        Ok((x, y))
    }
}

/// Lag-feature gradient-boosting forecaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmModel {
    params: GbmParams,
    /// Indexed `[step][component]`.
    boosters: Vec<Vec<Booster>>,
    components: Vec<String>,
    n_features: usize,
    history: LossHistory,
}

impl GbmModel {
    pub fn new(params: GbmParams) -> Self {
        Self {
            params,
            boosters: Vec::new(),
            components: Vec::new(),
            n_features: 0,
            history: LossHistory::default(),
        }
    }

    pub fn params(&self) -> &GbmParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.boosters.is_empty()
    }

    /// Mean loss across boosters, over the iterations all of them ran.
    fn collect_history(&mut self) {
        let all: Vec<&Booster> = self.boosters.iter().flatten().collect();
        let average = |pick: fn(&Booster) -> &Vec<f64>| -> Vec<f64> {
            let len = all.iter().map(|b| pick(b).len()).min().unwrap_or(0);
            (0..len)
                .map(|i| all.iter().map(|b| pick(b)[i]).sum::<f64>() / all.len() as f64)
                .collect()
        };
        self.history = LossHistory {
            train: average(|b| &b.train_loss),
            val: average(|b| &b.val_loss),
        };
    }
}

impl Forecaster for GbmModel {
    fn fit(&mut self, data: &FitData<'_>) -> Result<(), TrainingError> {
        check_fit_data(data)?;
        let params = &self.params;
        let coverage = |(covariates, missing): Missing| TrainingError::CovariateCoverage { covariates, missing };

        let frame = Frame::new(data.series, data.past_covariates, data.future_covariates);
        let joined = join_validation(data);
        let val_frame = joined
            .as_ref()
            .map(|(series, offset)| (Frame::new(series, data.past_covariates, data.future_covariates), *offset));

        let mut boosters = Vec::with_capacity(params.output_chunk_length);
        let mut n_features = 0;
        for h in 0..params.output_chunk_length {
            let (x, y) = frame.samples(params, h, 0..frame.n_rows()).map_err(coverage)?;
            if y[0].is_empty() {
                return Err(TrainingError::InsufficientHistory {
                    required: params.min_origin() + h + 1,
                    available: frame.n_rows(),
                });
            }
            n_features = x.len() / y[0].len();

            let val_samples = match &val_frame {
                Some((vf, offset)) => Some(vf.samples(params, h, *offset..vf.n_rows()).map_err(coverage)?),
                None => None,
            };

            let mut step = Vec::with_capacity(frame.n_comp);
            for (c, yc) in y.iter().enumerate() {
                let train = Dataset { x: &x, y: yc, n_features };
                let val = val_samples
                    .as_ref()
                    .filter(|(_, vy)| !vy[c].is_empty())
                    .map(|(vx, vy)| Dataset { x: vx, y: &vy[c], n_features });
                let booster = train_booster(&params.boosting(h, c), params.objective, &train, val.as_ref());
                debug!(step = h, component = c, trees = booster.n_trees(), rows = yc.len(), "fitted booster");
                step.push(booster);
            }
            boosters.push(step);
        }

        self.boosters = boosters;
        self.components = data.series.components().to_vec();
        self.n_features = n_features;
        self.collect_history();
        Ok(())
    }

    fn predict(&self, n: usize, ctx: &ForecastContext<'_>) -> Result<TimeSeries, AlignmentError> {
        if !self.is_fitted() {
            return Err(AlignmentError::NotFitted);
        }
        let available = ctx.series.len();
        if available < self.input_length() {
            return Err(AlignmentError::InsufficientHistory {
                position: available,
                required: self.input_length(),
                available,
            });
        }

        if ctx.series.n_components() != self.components.len() {
            return Err(AlignmentError::WidthMismatch {
                what: "target",
                expected: self.components.len(),
                actual: ctx.series.n_components(),
            });
        }

        let mut frame = Frame::new(ctx.series, ctx.past_covariates, ctx.future_covariates);
        let ahead = future_timestamps(ctx.series, ctx.future_covariates, ctx.past_covariates, n)?;
        frame.times.extend_from_slice(&ahead);
        let exhausted = |(covariates, at): Missing| AlignmentError::CovariatesExhausted { covariates, at };

        let mut out = Vec::with_capacity(n * frame.n_comp);
        let mut features = Vec::with_capacity(self.n_features);
        let mut produced = 0;
        while produced < n {
            let origin = frame.n_rows();
            let steps = self.output_length().min(n - produced);
            let mut chunk = Vec::with_capacity(steps * frame.n_comp);
            for h in 0..steps {
                features.clear();
                frame.features(&self.params, origin, h, &mut features).map_err(exhausted)?;
                if features.len() != self.n_features {
                    return Err(AlignmentError::WidthMismatch {
                        what: "feature",
                        expected: self.n_features,
                        actual: features.len(),
                    });
                }
                for booster in &self.boosters[h] {
                    chunk.push(booster.predict(&features));
                }
            }
            frame.target.extend_from_slice(&chunk);
            out.extend_from_slice(&chunk);
            produced += steps;
        }

        Ok(TimeSeries::new(ahead, self.components.clone(), out)?)
    }

    fn input_length(&self) -> usize {
        self.params.min_origin()
    }

    fn output_length(&self) -> usize {
        self.params.output_chunk_length
    }

    fn output_kind(&self) -> OutputKind {
        match self.params.objective {
            Loss::Logistic => OutputKind::Probability,
            Loss::Squared => OutputKind::Value,
        }
    }

    fn loss_history(&self) -> &LossHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::historical_forecasts;
    use crate::models::testing::alternating;
    use backtesting::binarize;

    fn config(lags: i64, chunk: i64) -> ModelConfiguration {
        ModelConfiguration::new()
            .with("lags", lags)
            .with("lags_past_covariates", 2_i64)
            .with("output_chunk_length", chunk)
            .with("learning_rate", 0.1)
            .with("num_leaves", 31_i64)
            .with("n_estimators", 30_i64)
            .with("min_child_samples", 5_i64)
            .with("subsample", 1.0)
            .with("colsample_bytree", 1.0)
            .with("objective", "binary")
            .with("random_state", 42_i64)
    }

    #[test]
    fn test_params_from_config() {
        let params = GbmParams::from_config(&config(4, 2)).unwrap();
        assert_eq!(params.lags, 4);
        assert_eq!(params.objective, Loss::Logistic);
        assert_eq!(params.min_origin(), 4);

        let bad = config(4, 2).with("subsample", 1.5);
        assert!(GbmParams::from_config(&bad).is_err());
        let missing = ModelConfiguration::new().with("lags", 3_i64);
        assert!(matches!(
            GbmParams::from_config(&missing),
            Err(ConfigurationError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_learns_alternating_labels() {
        let (target, past, future) = alternating(120);
        let train = target.slice(0..80);
        let val = target.slice(80..100);
        let mut model = GbmModel::new(GbmParams::from_config(&config(3, 1)).unwrap());
        model
            .fit(&FitData {
                series: &train,
                past_covariates: &past,
                future_covariates: &future,
                val_series: Some(&val),
            })
            .unwrap();
        assert!(!model.loss_history().train.is_empty());
        assert!(!model.loss_history().val.is_empty());

        let ctx = ForecastContext {
            series: &target,
            past_covariates: &past,
            future_covariates: &future,
        };
        let bt = historical_forecasts(&mut model, &ctx, target.time_index()[100], 1, 1, false).unwrap();
        assert_eq!(bt.len(), 20);
        assert_eq!(bt.time_index(), &target.time_index()[100..]);
        let decisions = binarize(bt.values(), 0.5);
        let truth: Vec<u8> = target.values()[100..].iter().map(|v| *v as u8).collect();
        assert_eq!(decisions, truth);
    }

    #[test]
    fn test_multi_step_prediction_is_autoregressive() {
        let (target, past, future) = alternating(100);
        let train = target.slice(0..70);
        let mut model = GbmModel::new(GbmParams::from_config(&config(2, 3)).unwrap());
        model
            .fit(&FitData {
                series: &train,
                past_covariates: &past,
                future_covariates: &future,
                val_series: None,
            })
            .unwrap();
        assert_eq!(model.boosters.len(), 3);

        let ctx = ForecastContext {
            series: &train,
            past_covariates: &past,
            future_covariates: &future,
        };
        let forecast = model.predict(7, &ctx).unwrap();
        assert_eq!(forecast.len(), 7);
        assert_eq!(forecast.time_index(), &target.time_index()[70..77]);
        assert!(forecast.values().iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_fit_errors() {
        let (target, past, future) = alternating(30);
        let mut model = GbmModel::new(GbmParams::from_config(&config(40, 1)).unwrap());
        let err = model
            .fit(&FitData {
                series: &target,
                past_covariates: &past,
                future_covariates: &future,
                val_series: None,
            })
            .unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientHistory { .. }));

        let empty = target.slice(0..0);
        let err = model
            .fit(&FitData {
                series: &empty,
                past_covariates: &past,
                future_covariates: &future,
                val_series: None,
            })
            .unwrap_err();
        assert_eq!(err, TrainingError::EmptyPartition("train"));

        let short_past = past.slice(0..20);
        let err = model
            .fit(&FitData {
                series: &target,
                past_covariates: &short_past,
                future_covariates: &future,
                val_series: None,
            })
            .unwrap_err();
        assert!(matches!(err, TrainingError::CovariateCoverage { covariates: "past covariates", .. }));
    }

    #[test]
    fn test_predict_before_fit() {
        let (target, past, future) = alternating(30);
        let model = GbmModel::new(GbmParams::from_config(&config(2, 1)).unwrap());
        let ctx = ForecastContext {
            series: &target,
            past_covariates: &past,
            future_covariates: &future,
        };
        assert!(matches!(model.predict(1, &ctx), Err(AlignmentError::NotFitted)));
    }
}
