//! Search spaces of the bundled models.

use crate::error::ConfigurationError;
use crate::models::ModelKind;
use crate::search_space::{Domain, ModelConfiguration, ParamSource};

/// Longest output chunk any space proposes.
pub const MAX_OUTPUT_CHUNK: i64 = 20;

/// Future covariate lags used by the GBM model, relative to the forecast point.
pub const GBM_FUTURE_LAGS: [i64; 3] = [0, -1, -2];

/// Seed handed to every model the spaces build.
pub const RANDOM_STATE: i64 = 42;

fn record(
    config: &mut ModelConfiguration,
    source: &mut dyn ParamSource,
    name: &str,
    domain: Domain,
) -> Result<(), ConfigurationError> {
    let value = source.propose(name, &domain)?;
    config.insert(name, value);
    Ok(())
}

/// Gradient-boosted tree space.
///
/// `output_chunk_length` is capped at `min(20, pred_steps)`.
pub fn define_gbm_space(
    source: &mut dyn ParamSource,
    pred_steps: usize,
) -> Result<ModelConfiguration, ConfigurationError> {
    let mut config = ModelConfiguration::new();
    let chunk = Domain::int_capped("output_chunk_length", 1, MAX_OUTPUT_CHUNK, pred_steps as i64)?;

    record(&mut config, source, "lags", Domain::int(1, 64))?;
    record(&mut config, source, "lags_past_covariates", Domain::int(1, 64))?;
    record(&mut config, source, "output_chunk_length", chunk)?;
    record(&mut config, source, "learning_rate", Domain::float(0.001, 0.1))?;
    record(&mut config, source, "num_leaves", Domain::int(31, 256))?;
    record(&mut config, source, "n_estimators", Domain::int(50, 500))?;
    record(&mut config, source, "min_child_samples", Domain::int(20, 100))?;
    record(&mut config, source, "subsample", Domain::float(0.6, 1.0))?;
    record(&mut config, source, "colsample_bytree", Domain::float(0.6, 1.0))?;
    record(&mut config, source, "objective", Domain::fixed("binary"))?;
    record(&mut config, source, "random_state", Domain::fixed(RANDOM_STATE))?;
    Ok(config)
}

/// Mixer network space.
pub fn define_mixer_space(
    source: &mut dyn ParamSource,
    pred_steps: usize,
) -> Result<ModelConfiguration, ConfigurationError> {
    let mut config = ModelConfiguration::new();
    let chunk = Domain::int_capped("output_chunk_length", 1, MAX_OUTPUT_CHUNK, pred_steps as i64)?;

    record(&mut config, source, "input_chunk_length", Domain::int(8, 64))?;
    record(&mut config, source, "output_chunk_length", chunk)?;
    record(&mut config, source, "hidden_size", Domain::int(16, 256))?;
    record(&mut config, source, "dropout", Domain::float(0.0, 0.5))?;
    record(&mut config, source, "learning_rate", Domain::log_float(1e-4, 1e-2))?;
    record(&mut config, source, "batch_size", Domain::fixed(128_i64))?;
    record(&mut config, source, "n_epochs", Domain::fixed(50_i64))?;
    record(&mut config, source, "random_state", Domain::fixed(RANDOM_STATE))?;
    Ok(config)
}

/// Mixer parameters selected by a completed search, used for deployment.
pub fn mixer_best_params() -> ModelConfiguration {
    ModelConfiguration::new()
        .with("input_chunk_length", 46_i64)
        .with("output_chunk_length", 12_i64)
        .with("hidden_size", 120_i64)
        .with("dropout", 0.1737067007307284)
        .with("learning_rate", 1e-3)
        .with("batch_size", 128_i64)
        .with("n_epochs", 50_i64)
        .with("random_state", RANDOM_STATE)
}

impl ModelKind {
    /// Resolve this model's search space through `source`.
    pub fn define_space(
        self,
        source: &mut dyn ParamSource,
        pred_steps: usize,
    ) -> Result<ModelConfiguration, ConfigurationError> {
        match self {
            ModelKind::Gbm => define_gbm_space(source, pred_steps),
            ModelKind::Mixer => define_mixer_space(source, pred_steps),
        }
    }
}
