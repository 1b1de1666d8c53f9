use std::path::Path;

use forecast_study::models::load_model;
use forecast_study::{ModelKind, ParamSource, TrialError};
use forecast_tuner::{
    load_bundle, open_study, run_report, run_train, training_params, DataConfig, ExperimentConfig, ModelConfig, OutputConfig,
    StudyConfig,
};
use series::{DataMode, SplitLengths};

fn experiment(dir: &Path, kind: ModelKind) -> ExperimentConfig {
    ExperimentConfig {
        data: DataConfig::Synthetic {
            n_points: 400,
            n_targets: 1,
            seed: 11,
            split: SplitLengths::default(),
        },
        study: StudyConfig {
            name: "cli-test".to_string(),
            storage_dir: dir.join("studies"),
            ..StudyConfig::default()
        },
        model: ModelConfig { kind },
        evaluation: Default::default(),
        output: OutputConfig {
            dir: dir.join("results"),
            ..OutputConfig::default()
        },
    }
}

const GBM_PARAMS: &str = r#"{
    "lags": 2,
    "lags_past_covariates": 1,
    "output_chunk_length": 1,
    "learning_rate": 0.1,
    "num_leaves": 31,
    "n_estimators": 50,
    "min_child_samples": 20,
    "subsample": 1.0,
    "colsample_bytree": 1,
    "objective": "binary",
    "random_state": 42
}"#;

#[test]
fn test_train_saves_scored_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = experiment(dir.path(), ModelKind::Gbm);
    config.validate().unwrap();
    let params_path = dir.path().join("params.json");
    std::fs::write(&params_path, GBM_PARAMS).unwrap();
    let model_path = dir.path().join("model.json");

    let evaluation = run_train(&config, Some(&params_path), false, false, &model_path).unwrap();
    assert_eq!(evaluation.forecast.len(), config.evaluation.pred_steps);
    assert!((0.0..=1.0).contains(&evaluation.score));

    let saved = load_model(&model_path).unwrap();
    assert_eq!(saved.kind, ModelKind::Gbm);
    // whole-number floats come back as floats after resolution
    assert_eq!(saved.params.get_float("colsample_bytree").unwrap(), 1.0);
    assert!((saved.report.unwrap().precision - evaluation.score).abs() < 1e-12);

    // the scored tail lies after every point the model was fitted or validated on
    let training = load_bundle(&config.data, DataMode::Training).unwrap();
    let fitted_until = training.val.end_time().unwrap();
    assert!(evaluation.truth.time_index().iter().all(|ts| *ts > fitted_until));
}

#[test]
fn test_full_fit_saves_unscored_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = experiment(dir.path(), ModelKind::Gbm);
    let params_path = dir.path().join("params.json");
    std::fs::write(&params_path, GBM_PARAMS).unwrap();
    let model_path = dir.path().join("model.json");

    let evaluation = run_train(&config, Some(&params_path), false, true, &model_path).unwrap();
    assert_eq!(evaluation.forecast.len(), config.evaluation.pred_steps);

    let saved = load_model(&model_path).unwrap();
    assert!(saved.report.is_none());
    assert_eq!(saved.params.get_int("lags").unwrap(), 2);
}

#[test]
fn test_out_of_space_params_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = experiment(dir.path(), ModelKind::Gbm);
    let params_path = dir.path().join("params.json");
    std::fs::write(&params_path, GBM_PARAMS.replace("\"n_estimators\": 50", "\"n_estimators\": 5")).unwrap();
    let err = run_train(&config, Some(&params_path), false, false, &dir.path().join("m.json")).unwrap_err();
    assert!(format!("{err:#}").contains("n_estimators"));
}

#[test]
fn test_training_params_sources() {
    let dir = tempfile::tempdir().unwrap();
    let gbm = experiment(dir.path(), ModelKind::Gbm);
    assert!(training_params(&gbm, None, false).is_err());
    assert!(training_params(&gbm, None, true).is_err());

    let mixer = experiment(dir.path(), ModelKind::Mixer);
    let params = training_params(&mixer, None, false).unwrap();
    assert_eq!(params.get_int("input_chunk_length").unwrap(), 46);
}

#[test]
fn test_report_and_best_params_from_study() {
    let dir = tempfile::tempdir().unwrap();
    let config = experiment(dir.path(), ModelKind::Gbm);

    let mut study = open_study(&config).unwrap();
    let mut call = 0;
    study
        .optimize(4, |proposal, _| {
            call += 1;
            let lags = proposal.propose_int("lags", 1, 64)?;
            if call == 3 {
                return Err(TrialError::Other("synthetic failure".into()));
            }
            Ok(lags as f64 / 64.0)
        })
        .unwrap();
    drop(study);

    let text = run_report(&config).unwrap();
    assert!(text.contains("Study cli-test (maximize)"));
    assert!(text.contains("failed"));
    assert!(text.contains("Best trial"));

    let best = training_params(&config, None, true).unwrap();
    assert!(best.get_int("lags").is_ok());

    // reopening resumes after the stored ids
    let reopened = open_study(&config).unwrap();
    assert_eq!(reopened.trials().len(), 4);
}
