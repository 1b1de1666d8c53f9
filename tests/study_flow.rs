use chrono::{Duration, TimeZone, Utc};

use forecast_study::evaluator::score_forecast;
use forecast_study::{
    evaluate, BestTracker, Direction, EvaluatorSettings, JournalStorage, ModelConfiguration, ModelKind,
    OutputKind, ParamSource, RandomSampler, StorageError, Study, StudyStorage, Trial, TrialError, TrialProposal,
    TrialStatus,
};
use series::{DataMode, DataProvider, SeriesBundle, SplitLengths, SyntheticDataProvider, TimeSeries};

fn bundle() -> SeriesBundle {
    SyntheticDataProvider::new(400, 1, 3, SplitLengths::default())
        .get_series_bundle(DataMode::Training, true)
        .unwrap()
}

/// A cheap GBM: the search only covers lags and tree count.
fn small_gbm(proposal: &mut TrialProposal<'_>) -> Result<ModelConfiguration, TrialError> {
    let lags = proposal.propose_int("lags", 1, 4)?;
    let n_estimators = proposal.propose_int("n_estimators", 5, 20)?;
    Ok(ModelConfiguration::new()
        .with("lags", lags)
        .with("lags_past_covariates", 1_i64)
        .with("output_chunk_length", 1_i64)
        .with("learning_rate", 0.1)
        .with("num_leaves", 4_i64)
        .with("n_estimators", n_estimators)
        .with("min_child_samples", 5_i64)
        .with("subsample", 1.0)
        .with("colsample_bytree", 1.0))
}

fn open(dir: &std::path::Path, name: &str, direction: Direction) -> Result<Study, StorageError> {
    Study::load_or_create(
        name,
        direction,
        Box::new(JournalStorage::new(dir)?),
        Box::new(RandomSampler::new(5)),
    )
}

#[test]
fn test_search_scores_every_trial() {
    let bundle = bundle();
    let settings = EvaluatorSettings::default();
    let dir = tempfile::tempdir().unwrap();
    let mut study = open(dir.path(), "gbm-small", Direction::Maximize).unwrap();

    let summary = study
        .optimize(3, |proposal, _| {
            let config = small_gbm(proposal)?;
            Ok(evaluate(ModelKind::Gbm, &config, &bundle, &settings)?.score)
        })
        .unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);
    for trial in study.trials() {
        let value = trial.value.unwrap();
        assert!((0.0..=1.0).contains(&value));
        assert!(trial.params.get_int("lags").is_ok());
    }
    let best = study.best_trial().unwrap();
    assert!(study.trials().iter().all(|t| t.value <= best.value));
}

#[test]
fn test_failed_trial_does_not_stop_the_study() {
    let bundle = bundle();
    let settings = EvaluatorSettings::default();
    // ten training points cannot feed forty lags
    let short_window = EvaluatorSettings {
        train_window: 10,
        ..EvaluatorSettings::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let mut study = open(dir.path(), "isolation", Direction::Maximize).unwrap();

    let summary = study
        .optimize(5, |proposal, _| {
            let mut config = small_gbm(proposal)?;
            let settings = if proposal.trial_id() == 2 {
                config.insert("lags", 40_i64);
                &short_window
            } else {
                &settings
            };
            Ok(evaluate(ModelKind::Gbm, &config, &bundle, settings)?.score)
        })
        .unwrap();

    assert_eq!(summary.attempted, 5);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 1);
    let failed = &study.trials()[2];
    assert_eq!(failed.status, TrialStatus::Failed);
    let error = failed.error.as_deref().unwrap();
    assert!(error.starts_with("training: need at least"), "{error}");
    for later in &study.trials()[3..] {
        assert_eq!(later.status, TrialStatus::Complete);
        assert!(later.value.is_some());
    }
    assert_ne!(study.best_trial().unwrap().id, 2);
}

#[test]
fn test_journal_resume() {
    let dir = tempfile::tempdir().unwrap();
    let objective = |proposal: &mut TrialProposal<'_>, _: &BestTracker| -> Result<f64, TrialError> {
        Ok(proposal.propose_float("x", 0.0, 1.0, false)?)
    };

    let first_best = {
        let mut study = open(dir.path(), "resume", Direction::Maximize).unwrap();
        study.optimize(3, objective).unwrap();
        study.best().value()
    };

    // simulate a crash in the middle of trial 3
    let mut storage = JournalStorage::new(dir.path()).unwrap();
    storage.append_trial("resume", &Trial::running(3, Utc::now())).unwrap();

    let mut study = open(dir.path(), "resume", Direction::Maximize).unwrap();
    assert_eq!(study.trials().len(), 4);
    assert_eq!(study.trials()[3].status, TrialStatus::Failed);
    assert_eq!(study.best().value(), first_best);

    let summary = study.optimize(2, objective).unwrap();
    assert_eq!(summary.completed, 2);
    let ids: Vec<u64> = study.trials().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

    let stored = storage.load_study("resume").unwrap().unwrap();
    assert_eq!(stored.trials.len(), 6);
    assert_eq!(stored.trials[3].status, TrialStatus::Failed);

    let err = open(dir.path(), "resume", Direction::Minimize).err().unwrap();
    assert!(matches!(err, StorageError::DirectionMismatch { .. }));
}

#[test]
fn test_precision_of_known_forecast() {
    let origin = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let index: Vec<_> = (0..5).map(|i| origin + Duration::days(i)).collect();
    let truth = TimeSeries::univariate(index.clone(), "up", vec![1.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
    let forecast = TimeSeries::univariate(index.clone(), "up", vec![0.9, 0.8, 0.4, 0.7, 0.2]).unwrap();

    let report = score_forecast(&truth, &forecast, OutputKind::Probability, 0.5).unwrap();
    assert!((report.precision - 2.0 / 3.0).abs() < 1e-12);
    assert!((report.recall - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(report.confusion.predicted_positive(), 3);

    // nothing above the threshold: precision is zero, not NaN
    let report = score_forecast(&truth, &forecast, OutputKind::Probability, 0.95).unwrap();
    assert_eq!(report.precision, 0.0);

    let truth = TimeSeries::univariate(index[..4].to_vec(), "up", vec![1.0, 0.0, 1.0, 1.0]).unwrap();
    let forecast = TimeSeries::univariate(index[..4].to_vec(), "up", vec![0.9, 0.1, 0.6, 0.4]).unwrap();
    let report = score_forecast(&truth, &forecast, OutputKind::Probability, 0.5).unwrap();
    assert_eq!(report.precision, 1.0);
    assert_eq!(report.confusion.predicted_positive(), 2);
}
