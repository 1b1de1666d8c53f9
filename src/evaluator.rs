//! Evaluation of one model configuration.
//!
//! The steps run in a fixed order, each consuming the previous one:
//!
//! ```text
//! Built --fit--> Fitted --backtest--> Backtested --score--> Evaluation
//! ```
//!
//! The model is held in a [`ModelLease`] for the whole pipeline, so its
//! training state is released on every exit path, including errors.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

use backtesting::{classification_report, sigmoid, ClassificationReport};
use series::{SeriesBundle, TimeSeries};

use crate::error::{AlignmentError, ScoringError, TrialError};
use crate::models::{historical_forecasts, AnyModel, FitData, ForecastContext, Forecaster, LossHistory, ModelKind, OutputKind};
use crate::search_space::ModelConfiguration;
use crate::study::{BestTracker, TrialProposal};

/// How the held-out tail is forecast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// One step ahead from every origin in the tail, no refitting.
    #[default]
    RollingOrigin,
    /// The whole tail in one forecast from the history before it.
    DirectMultiStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    /// Points of the test tail that are forecast and scored.
    pub pred_steps: usize,
    /// Trailing training points used for fitting; 0 keeps all.
    pub train_window: usize,
    pub threshold: f64,
    pub mode: EvaluationMode,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            pred_steps: 20,
            train_window: 300,
            threshold: 0.5,
            mode: EvaluationMode::RollingOrigin,
        }
    }
}

/// A model whose training state is released when the lease ends.
pub struct ModelLease<M: Forecaster = AnyModel>(M);

impl<M: Forecaster> ModelLease<M> {
    pub fn new(model: M) -> Self {
        Self(model)
    }
}

impl<M: Forecaster + Clone> ModelLease<M> {
    /// Copy of the leased model with its training state already released.
    pub fn detach(&self) -> M {
        let mut model = self.0.clone();
        model.release();
        model
    }
}

impl<M: Forecaster> Deref for ModelLease<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.0
    }
}

impl<M: Forecaster> DerefMut for ModelLease<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.0
    }
}

impl<M: Forecaster> Drop for ModelLease<M> {
    fn drop(&mut self) {
        self.0.release();
        debug!("released model");
    }
}

/// A configured, untrained model bound to its data.
pub struct Built<'a, M: Forecaster = AnyModel> {
    lease: ModelLease<M>,
    bundle: &'a SeriesBundle,
    settings: &'a EvaluatorSettings,
}

pub struct Fitted<'a, M: Forecaster = AnyModel> {
    lease: ModelLease<M>,
    bundle: &'a SeriesBundle,
    settings: &'a EvaluatorSettings,
}

pub struct Backtested<'a, M: Forecaster = AnyModel> {
    lease: ModelLease<M>,
    settings: &'a EvaluatorSettings,
    forecast: TimeSeries,
    truth: TimeSeries,
}

/// Scored outcome of one configuration.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Precision of the thresholded forecasts.
    pub score: f64,
    pub report: ClassificationReport,
    /// Forecast probabilities over the scored window.
    pub forecast: TimeSeries,
    pub truth: TimeSeries,
    pub loss_history: LossHistory,
}

impl<'a, M: Forecaster> Built<'a, M> {
    /// Lease `model` and check the bundle; the model is released when the
    /// bundle is rejected.
    pub fn new(model: M, bundle: &'a SeriesBundle, settings: &'a EvaluatorSettings) -> Result<Self, AlignmentError> {
        let lease = ModelLease::new(model);
        bundle.validate(settings.pred_steps)?;
        Ok(Self {
            lease,
            bundle,
            settings,
        })
    }

    /// Fit on the trailing `train_window` training points, validating on
    /// `val`.
    pub fn fit(mut self) -> Result<Fitted<'a, M>, TrialError> {
        let train = match self.settings.train_window {
            0 => self.bundle.train.clone(),
            n => self.bundle.train.tail(n),
        };
        let val = Some(&self.bundle.val).filter(|v| !v.is_empty());
        self.lease.fit(&FitData {
            series: &train,
            past_covariates: &self.bundle.past_covariates,
            future_covariates: &self.bundle.future_covariates,
            val_series: val,
        })?;
        debug!(train_points = train.len(), "model fitted");
        Ok(Fitted {
            lease: self.lease,
            bundle: self.bundle,
            settings: self.settings,
        })
    }
}

impl<'a, M: Forecaster> Fitted<'a, M> {
    /// Forecast the last `pred_steps` points of `test`.
    pub fn backtest(mut self) -> Result<Backtested<'a, M>, TrialError> {
        let test = &self.bundle.test;
        let n = self.settings.pred_steps.max(1);
        let ctx = ForecastContext {
            series: test,
            past_covariates: &self.bundle.past_covariates,
            future_covariates: &self.bundle.future_covariates,
        };
        let forecast = match self.settings.mode {
            EvaluationMode::RollingOrigin => {
                let start = test.time_index()[test.len() - n];
                historical_forecasts(&mut *self.lease, &ctx, start, 1, 1, false)?
            }
            EvaluationMode::DirectMultiStep => {
                let history = test.drop_last(n);
                self.lease.predict(n, &ctx.with_series(&history))?
            }
        };
        Ok(Backtested {
            lease: self.lease,
            settings: self.settings,
            forecast,
            truth: test.tail(n),
        })
    }

    pub fn model(&self) -> &M {
        &self.lease
    }
}

impl<M: Forecaster + Clone> Fitted<'_, M> {
    /// The fitted model with its training state released, without scoring.
    pub fn into_model(self) -> M {
        self.lease.detach()
    }
}

impl<M: Forecaster> Backtested<'_, M> {
    pub fn score(self) -> Result<Evaluation, TrialError> {
        self.evaluation()
    }

    fn evaluation(&self) -> Result<Evaluation, TrialError> {
        let n = self.settings.pred_steps.max(1);
        let kind = self.lease.output_kind();
        let truth = self.truth.tail(n);
        let forecast = self.forecast.tail(n);
        let report = score_forecast(&truth, &forecast, kind, self.settings.threshold)?;
        let probabilities = match kind {
            OutputKind::Logit => forecast.map_values(sigmoid),
            OutputKind::Probability | OutputKind::Value => forecast,
        };
        Ok(Evaluation {
            score: report.precision,
            report,
            forecast: probabilities,
            truth,
            loss_history: self.lease.loss_history().clone(),
        })
    }
}

impl<M: Forecaster + Clone> Backtested<'_, M> {
    /// Score and hand back a released copy of the fitted model.
    pub fn score_keeping_model(self) -> Result<(Evaluation, M), TrialError> {
        let evaluation = self.evaluation()?;
        Ok((evaluation, self.lease.detach()))
    }
}

/// Score a backtest against the truth over the same window.
///
/// Fails when the two series differ in length or timestamps, or when a
/// label is not exactly 0 or 1. Logit outputs pass through a sigmoid before
/// thresholding; a value above `threshold` is a positive prediction.
pub fn score_forecast(
    truth: &TimeSeries,
    forecast: &TimeSeries,
    kind: OutputKind,
    threshold: f64,
) -> Result<ClassificationReport, ScoringError> {
    if truth.len() != forecast.len() || truth.n_components() != forecast.n_components() {
        return Err(ScoringError::LengthMismatch {
            truth: truth.values().len(),
            forecast: forecast.values().len(),
        });
    }
    let misaligned = truth
        .time_index()
        .iter()
        .zip(forecast.time_index())
        .position(|(t, f)| t != f);
    if let Some(position) = misaligned {
        return Err(ScoringError::IndexMismatch {
            position,
            truth: truth.time_index()[position],
            forecast: forecast.time_index()[position],
        });
    }

    let probabilities: Vec<f64> = match kind {
        OutputKind::Logit => forecast.values().iter().map(|z| sigmoid(*z)).collect(),
        OutputKind::Probability | OutputKind::Value => forecast.values().to_vec(),
    };
    Ok(classification_report(truth.values(), &probabilities, threshold)?)
}

/// Build, fit, backtest and score one configuration.
pub fn evaluate(
    kind: ModelKind,
    config: &ModelConfiguration,
    bundle: &SeriesBundle,
    settings: &EvaluatorSettings,
) -> Result<Evaluation, TrialError> {
    let model = kind.build(config)?;
    Built::new(model, bundle, settings)?.fit()?.backtest()?.score()
}

/// Study objective searching the space of `kind` against `bundle`.
///
/// Recall, accuracy and F1 of every trial are kept as user attributes.
pub fn search_objective<'a>(
    kind: ModelKind,
    bundle: &'a SeriesBundle,
    settings: &'a EvaluatorSettings,
) -> impl FnMut(&mut TrialProposal<'_>, &BestTracker) -> Result<f64, TrialError> + 'a {
    move |proposal: &mut TrialProposal<'_>, best: &BestTracker| {
        let config = kind.define_space(proposal, settings.pred_steps)?;
        let evaluation = evaluate(kind, &config, bundle, settings)?;
        let report = &evaluation.report;
        proposal.set_user_attr("recall", report.recall);
        proposal.set_user_attr("accuracy", report.accuracy);
        proposal.set_user_attr("f1", report.f1);
        proposal.set_user_attr("positive_predictions", report.confusion.predicted_positive() as f64);
        info!(
            trial = proposal.trial_id(),
            precision = evaluation.score,
            recall = report.recall,
            best_so_far = ?best.value(),
            "trial scored"
        );
        Ok(evaluation.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{alternating, days, Scripted};
    use series::calendar_covariates;

    fn bundle(n: usize) -> SeriesBundle {
        let (target, past, future) = alternating(n);
        let val_start = n - 60;
        let test_start = n - 40;
        SeriesBundle {
            train: target.slice(0..val_start),
            val: target.slice(val_start..test_start),
            test: target.slice(test_start..n),
            past_covariates: past,
            future_covariates: future,
        }
    }

    fn gbm_config() -> ModelConfiguration {
        ModelConfiguration::new()
            .with("lags", 3_i64)
            .with("lags_past_covariates", 2_i64)
            .with("output_chunk_length", 1_i64)
            .with("learning_rate", 0.1)
            .with("num_leaves", 8_i64)
            .with("n_estimators", 30_i64)
            .with("min_child_samples", 5_i64)
            .with("subsample", 1.0)
            .with("colsample_bytree", 1.0)
            .with("objective", "binary")
            .with("random_state", 42_i64)
    }

    #[test]
    fn test_pipeline_scores_learnable_series() {
        let data = bundle(160);
        let settings = EvaluatorSettings::default();
        let evaluation = evaluate(ModelKind::Gbm, &gbm_config(), &data, &settings).unwrap();
        assert_eq!(evaluation.forecast.len(), 20);
        assert_eq!(evaluation.forecast.time_index(), evaluation.truth.time_index());
        assert_eq!(evaluation.truth.time_index(), &data.test.time_index()[20..]);
        assert_eq!(evaluation.score, 1.0);
        assert_eq!(evaluation.report.confusion.false_negatives, 0);
        assert!(!evaluation.loss_history.train.is_empty());
    }

    #[test]
    fn test_direct_mode_forecasts_whole_tail() {
        let data = bundle(160);
        let settings = EvaluatorSettings {
            mode: EvaluationMode::DirectMultiStep,
            pred_steps: 5,
            ..EvaluatorSettings::default()
        };
        let model = ModelKind::Gbm.build(&gbm_config()).unwrap();
        let backtested = Built::new(model, &data, &settings).unwrap().fit().unwrap().backtest().unwrap();
        let (evaluation, kept) = backtested.score_keeping_model().unwrap();
        assert_eq!(evaluation.forecast.len(), 5);
        assert_eq!(evaluation.truth.time_index(), &data.test.time_index()[35..]);
        assert_eq!(kept.kind(), ModelKind::Gbm);
    }

    #[test]
    fn test_short_test_partition_rejected() {
        let mut data = bundle(160);
        data.test = data.test.slice(0..10);
        let settings = EvaluatorSettings::default();
        let model = ModelKind::Gbm.build(&gbm_config()).unwrap();
        assert!(matches!(
            Built::new(model, &data, &settings),
            Err(AlignmentError::Series(_))
        ));
    }

    #[test]
    fn test_score_requires_matching_index() {
        let truth = TimeSeries::univariate(days(0, 4), "y", vec![1.0, 0.0, 1.0, 1.0]).unwrap();
        let shifted = TimeSeries::univariate(days(1, 4), "y", vec![0.9, 0.1, 0.6, 0.4]).unwrap();
        assert!(matches!(
            score_forecast(&truth, &shifted, OutputKind::Probability, 0.5),
            Err(ScoringError::IndexMismatch { position: 0, .. })
        ));

        let short = TimeSeries::univariate(days(0, 3), "y", vec![0.9, 0.1, 0.6]).unwrap();
        assert!(matches!(
            score_forecast(&truth, &short, OutputKind::Probability, 0.5),
            Err(ScoringError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_score_known_scenario() {
        let truth = TimeSeries::univariate(days(0, 4), "y", vec![1.0, 0.0, 1.0, 1.0]).unwrap();
        let forecast = TimeSeries::univariate(days(0, 4), "y", vec![0.9, 0.1, 0.6, 0.4]).unwrap();
        let report = score_forecast(&truth, &forecast, OutputKind::Probability, 0.5).unwrap();
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.confusion.true_positives, 2);

        // logits of the same decisions
        let logits = forecast.map_values(|p| (p / (1.0 - p)).ln());
        let report = score_forecast(&truth, &logits, OutputKind::Logit, 0.5).unwrap();
        assert_eq!(report.precision, 1.0);
    }

    #[test]
    fn test_score_rejects_non_binary_labels() {
        let truth = TimeSeries::univariate(days(0, 3), "y", vec![1.0, 0.5, 0.0]).unwrap();
        let forecast = TimeSeries::univariate(days(0, 3), "y", vec![0.9, 0.8, 0.1]).unwrap();
        assert_eq!(
            score_forecast(&truth, &forecast, OutputKind::Probability, 0.5).unwrap_err(),
            ScoringError::InvalidLabel {
                position: 1,
                value: 0.5
            }
        );
    }

    #[test]
    fn test_coverage_checked_before_fit() {
        let (target, past, _) = alternating(100);
        let short_future = calendar_covariates(&target.time_index()[..50]).unwrap();
        let data = SeriesBundle {
            train: target.slice(0..40),
            val: target.slice(40..60),
            test: target.slice(60..100),
            past_covariates: past,
            future_covariates: short_future,
        };
        let settings = EvaluatorSettings::default();
        let model = ModelKind::Gbm.build(&gbm_config()).unwrap();
        assert!(Built::new(model, &data, &settings).is_err());
    }

    #[test]
    fn test_kept_model_has_training_state_released() {
        let data = bundle(160);
        let settings = EvaluatorSettings::default();
        let config = ModelConfiguration::new()
            .with("input_chunk_length", 4_i64)
            .with("output_chunk_length", 1_i64)
            .with("hidden_size", 8_i64)
            .with("dropout", 0.1)
            .with("learning_rate", 0.01)
            .with("batch_size", 32_i64)
            .with("n_epochs", 3_i64)
            .with("random_state", 42_i64);
        let model = ModelKind::Mixer.build(&config).unwrap();
        let fitted = Built::new(model, &data, &settings).unwrap().fit().unwrap();
        match fitted.model() {
            AnyModel::Mixer(m) => assert!(m.holds_training_state()),
            other => panic!("unexpected model {:?}", other.kind()),
        }
        let (evaluation, kept) = fitted.backtest().unwrap().score_keeping_model().unwrap();
        assert_eq!(evaluation.forecast.len(), 20);
        assert!(evaluation.forecast.values().iter().all(|p| (0.0..=1.0).contains(p)));
        match kept {
            AnyModel::Mixer(m) => assert!(!m.holds_training_state()),
            other => panic!("unexpected model {:?}", other.kind()),
        }
    }

    /// Twenty daily labels; the last four are the scored tail.
    fn scripted_bundle(tail: [f64; 4]) -> SeriesBundle {
        let index = days(0, 20);
        let mut labels: Vec<f64> = (0..16).map(|i| (i % 2) as f64).collect();
        labels.extend_from_slice(&tail);
        let target = TimeSeries::univariate(index.clone(), "label", labels).unwrap();
        SeriesBundle {
            train: target.slice(0..10),
            val: target.slice(10..14),
            test: target.slice(14..20),
            past_covariates: target.clone(),
            future_covariates: calendar_covariates(&index).unwrap(),
        }
    }

    fn scripted_model() -> Scripted {
        Scripted::new(TimeSeries::univariate(days(16, 4), "label", vec![0.9, 0.1, 0.6, 0.4]).unwrap())
    }

    fn four_steps() -> EvaluatorSettings {
        EvaluatorSettings {
            pred_steps: 4,
            ..EvaluatorSettings::default()
        }
    }

    #[test]
    fn test_pipeline_known_scenario() {
        let data = scripted_bundle([1.0, 0.0, 1.0, 1.0]);
        let settings = four_steps();
        let model = scripted_model();
        let released = model.released.clone();

        let evaluation = Built::new(model, &data, &settings)
            .unwrap()
            .fit()
            .unwrap()
            .backtest()
            .unwrap()
            .score()
            .unwrap();
        assert_eq!(evaluation.score, 1.0);
        assert_eq!(evaluation.report.confusion.true_positives, 2);
        assert_eq!(evaluation.forecast.values(), &[0.9, 0.1, 0.6, 0.4]);
        assert_eq!(evaluation.truth.time_index(), &days(16, 4)[..]);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_released_when_scoring_fails() {
        let data = scripted_bundle([1.0, 0.5, 1.0, 1.0]);
        let settings = four_steps();
        let model = scripted_model();
        let released = model.released.clone();

        let backtested = Built::new(model, &data, &settings).unwrap().fit().unwrap().backtest().unwrap();
        assert_eq!(released.get(), 0);
        let err = backtested.score().unwrap_err();
        assert!(matches!(
            err,
            TrialError::Scoring(ScoringError::InvalidLabel { position: 1, .. })
        ));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_released_when_bundle_rejected() {
        let mut data = scripted_bundle([1.0, 0.0, 1.0, 1.0]);
        data.test = data.test.slice(0..2);
        let settings = four_steps();
        let model = scripted_model();
        let released = model.released.clone();

        assert!(Built::new(model, &data, &settings).is_err());
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_into_model_skips_scoring() {
        let data = scripted_bundle([1.0, 0.0, 1.0, 1.0]);
        let settings = four_steps();
        let model = scripted_model();
        let released = model.released.clone();

        let kept = Built::new(model, &data, &settings).unwrap().fit().unwrap().into_model();
        // once for the returned copy, once for the lease
        assert_eq!(released.get(), 2);
        assert_eq!(kept.answers.len(), 4);
    }
}
