use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

use backtesting::ClassificationReport;

use super::{AnyModel, ModelKind};
use crate::search_space::ModelConfiguration;

/// Container for a fitted model on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub kind: ModelKind,
    /// Configuration the model was built from.
    pub params: ModelConfiguration,
    /// Fitted weights.
    pub model: AnyModel,
    pub saved_at: DateTime<Utc>,
    /// Evaluation of the model at save time, when one was run.
    #[serde(default)]
    pub report: Option<ClassificationReport>,
}

impl SavedModel {
    pub fn new(params: ModelConfiguration, model: AnyModel, report: Option<ClassificationReport>) -> Self {
        Self {
            kind: model.kind(),
            params,
            model,
            saved_at: Utc::now(),
            report,
        }
    }
}

/// Save a model as pretty JSON.
pub fn save_model<P: AsRef<Path>>(saved: &SavedModel, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create model file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), saved).context("Failed to serialize model to JSON")?;
    info!(kind = %saved.kind, path = %path.display(), "model saved");
    Ok(())
}

/// Load a model written by [`save_model`].
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<SavedModel> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open model file: {}", path.display()))?;
    let saved: SavedModel = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to deserialize model from {}", path.display()))?;
    if saved.kind != saved.model.kind() {
        anyhow::bail!(
            "model file {} declares kind {} but holds a {} model",
            path.display(),
            saved.kind,
            saved.model.kind()
        );
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::alternating;
    use crate::models::{FitData, ForecastContext, Forecaster};
    use crate::spaces::mixer_best_params;

    #[test]
    fn test_save_and_load_fitted_gbm() {
        let config = ModelConfiguration::new()
            .with("lags", 2_i64)
            .with("lags_past_covariates", 1_i64)
            .with("output_chunk_length", 1_i64)
            .with("learning_rate", 0.1)
            .with("num_leaves", 4_i64)
            .with("n_estimators", 5_i64)
            .with("min_child_samples", 2_i64)
            .with("subsample", 1.0)
            .with("colsample_bytree", 1.0)
            .with("objective", "binary")
            .with("random_state", 42_i64);
        let (target, past, future) = alternating(40);
        let mut model = ModelKind::Gbm.build(&config).unwrap();
        model
            .fit(&FitData {
                series: &target.slice(0..30),
                past_covariates: &past,
                future_covariates: &future,
                val_series: None,
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gbm.json");
        save_model(&SavedModel::new(config.clone(), model.clone(), None), &path).unwrap();
        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded.kind, ModelKind::Gbm);
        assert_eq!(loaded.params, config);

        let ctx = ForecastContext {
            series: &target.slice(0..30),
            past_covariates: &past,
            future_covariates: &future,
        };
        let before = model.predict(3, &ctx).unwrap();
        let after = loaded.model.predict(3, &ctx).unwrap();
        assert_eq!(before.time_index(), after.time_index());
        for (a, b) in before.values().iter().zip(after.values()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let model = ModelKind::Mixer.build(&mixer_best_params()).unwrap();
        let mut saved = SavedModel::new(mixer_best_params(), model, None);
        saved.kind = ModelKind::Gbm;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        save_model(&saved, &path).unwrap();
        assert!(load_model(&path).is_err());
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_model("/nonexistent/model.json").unwrap_err();
        assert!(err.to_string().contains("Failed to open model file"));
    }
}
