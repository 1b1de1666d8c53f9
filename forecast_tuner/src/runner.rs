//! The work behind each subcommand.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forecast_study::evaluator::search_objective;
use forecast_study::models::{save_model, SavedModel};
use forecast_study::report::{plot_backtest, plot_loss_history, trials_table, BestTrialReport};
use forecast_study::spaces::mixer_best_params;
use forecast_study::{
    BestTracker, Built, Evaluation, FixedParams, JournalStorage, ModelConfiguration, ModelKind,
    OptimizationSummary, RandomSampler, Sampler, Study, StudyStorage, TpeSampler,
};
use series::{CsvDataProvider, DataMode, DataProvider, SeriesBundle, SyntheticDataProvider};

use crate::config::{DataConfig, ExperimentConfig, SamplerKind};

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str, verbose: bool) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Build the series bundle described by `data`.
pub fn load_bundle(data: &DataConfig, mode: DataMode) -> Result<SeriesBundle> {
    let bundle = match data {
        DataConfig::Csv {
            path,
            layout,
            split,
            binary,
        } => CsvDataProvider::new(path.clone(), layout.clone(), *split)
            .get_series_bundle(mode, *binary)
            .with_context(|| format!("Failed to load series from {}", path.display()))?,
        DataConfig::Synthetic {
            n_points,
            n_targets,
            seed,
            split,
        } => SyntheticDataProvider::new(*n_points, *n_targets, *seed, *split)
            .get_series_bundle(mode, true)
            .context("Failed to generate synthetic series")?,
    };
    info!(
        mode = %mode,
        train = bundle.train.len(),
        val = bundle.val.len(),
        test = bundle.test.len(),
        targets = bundle.n_targets(),
        "series bundle ready"
    );
    Ok(bundle)
}

fn sampler(config: &ExperimentConfig) -> Box<dyn Sampler> {
    match config.study.sampler {
        SamplerKind::Tpe => Box::new(TpeSampler::new(config.study.seed)),
        SamplerKind::Random => Box::new(RandomSampler::new(config.study.seed)),
    }
}

/// Open (or create) the configured study journal.
pub fn open_study(config: &ExperimentConfig) -> Result<Study> {
    let storage = JournalStorage::new(&config.study.storage_dir)?;
    let study = Study::load_or_create(&config.study.name, config.study.direction, Box::new(storage), sampler(config))
        .with_context(|| format!("Failed to open study '{}'", config.study.name))?;
    Ok(study)
}

fn output_path(config: &ExperimentConfig, suffix: &str) -> Result<PathBuf> {
    fs::create_dir_all(&config.output.dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output.dir.display()))?;
    Ok(config.output.dir.join(format!("{}_{}", config.study.name, suffix)))
}

fn write_plots(config: &ExperimentConfig, evaluation: &Evaluation) -> Result<()> {
    if !config.output.plot {
        return Ok(());
    }
    let backtest = output_path(config, "backtest.png")?;
    if let Err(e) = plot_backtest(evaluation, config.evaluation.threshold, &backtest) {
        warn!(error = %e, "could not plot backtest");
    }
    let losses = output_path(config, "loss.png")?;
    if let Err(e) = plot_loss_history(&evaluation.loss_history, &losses) {
        warn!(error = %e, "could not plot loss history");
    }
    Ok(())
}

/// Fit, backtest and score `params` after checking them against the space.
fn evaluate_fixed(
    config: &ExperimentConfig,
    params: ModelConfiguration,
    bundle: &SeriesBundle,
) -> Result<(ModelConfiguration, Evaluation, forecast_study::AnyModel)> {
    let kind = config.model.kind;
    let resolved = kind
        .define_space(&mut FixedParams::new(params), config.evaluation.pred_steps)
        .context("Parameters do not fit the model's search space")?;
    let model = kind.build(&resolved)?;
    let (evaluation, model) = Built::new(model, bundle, &config.evaluation)?
        .fit()?
        .backtest()?
        .score_keeping_model()?;
    Ok((resolved, evaluation, model))
}

/// Run the study and write the best-trial report.
pub fn run_optimize(config: &ExperimentConfig, n_trials: Option<usize>) -> Result<OptimizationSummary> {
    let bundle = load_bundle(&config.data, DataMode::Training)?;
    let mut study = open_study(config)?;
    let n_trials = n_trials.unwrap_or(config.study.n_trials);
    info!(study = study.name(), model = %config.model.kind, n_trials, "starting optimization");

    let summary = study.optimize(n_trials, search_objective(config.model.kind, &bundle, &config.evaluation))?;
    info!(
        attempted = summary.attempted,
        completed = summary.completed,
        failed = summary.failed,
        "optimization finished"
    );

    let Some(best_params) = study.best().params().cloned() else {
        warn!("no completed trial, nothing to report");
        return Ok(summary);
    };
    let evaluation = match evaluate_fixed(config, best_params, &bundle) {
        Ok((_, evaluation, _)) => {
            write_plots(config, &evaluation)?;
            Some(evaluation.report)
        }
        Err(e) => {
            warn!(error = %e, "re-evaluation of the best trial failed");
            None
        }
    };
    if let Some(report) = BestTrialReport::from_study(&study, evaluation) {
        let path = output_path(config, "best.json")?;
        report.write_json(&path)?;
        info!(path = %path.display(), "best trial report written");
    }
    Ok(summary)
}

/// Parameters for `train`: a JSON file, the study's best trial or the
/// shipped mixer parameters.
pub fn training_params(config: &ExperimentConfig, params: Option<&Path>, from_study: bool) -> Result<ModelConfiguration> {
    if let Some(path) = params {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read parameter file: {}", path.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse parameter file: {}", path.display()));
    }
    if from_study {
        let storage = JournalStorage::new(&config.study.storage_dir)?;
        let stored = storage
            .load_study(&config.study.name)?
            .with_context(|| format!("Study '{}' does not exist", config.study.name))?;
        let best = BestTracker::from_trials(&stored.trials, stored.direction);
        return best
            .params()
            .cloned()
            .with_context(|| format!("Study '{}' has no completed trial", config.study.name));
    }
    match config.model.kind {
        ModelKind::Mixer => Ok(mixer_best_params()),
        ModelKind::Gbm => anyhow::bail!("gbm training needs --params or --from-study"),
    }
}

/// Fit one model, score it on the held-out tail of the training bundle and
/// save it.
///
/// With `full_fit` the saved model is refit on the predicting bundle, whose
/// partitions run to the end of the data; it carries no report since every
/// scored point was seen while fitting.
pub fn run_train(
    config: &ExperimentConfig,
    params: Option<&Path>,
    from_study: bool,
    full_fit: bool,
    model_out: &Path,
) -> Result<Evaluation> {
    let params = training_params(config, params, from_study)?;
    let bundle = load_bundle(&config.data, DataMode::Training)?;
    let (resolved, evaluation, model) = evaluate_fixed(config, params, &bundle)?;
    info!(
        precision = evaluation.score,
        recall = evaluation.report.recall,
        positives = evaluation.report.confusion.predicted_positive(),
        "model evaluated"
    );
    write_plots(config, &evaluation)?;

    let saved = if full_fit {
        let bundle = load_bundle(&config.data, DataMode::Predicting)?;
        let model = Built::new(config.model.kind.build(&resolved)?, &bundle, &config.evaluation)?
            .fit()?
            .into_model();
        info!("refit on the full series");
        SavedModel::new(resolved, model, None)
    } else {
        SavedModel::new(resolved, model, Some(evaluation.report.clone()))
    };
    save_model(&saved, model_out)?;
    Ok(evaluation)
}

/// Text summary of the stored study.
pub fn run_report(config: &ExperimentConfig) -> Result<String> {
    let storage = JournalStorage::new(&config.study.storage_dir)?;
    let stored = storage
        .load_study(&config.study.name)?
        .with_context(|| format!("Study '{}' does not exist", config.study.name))?;
    let best = BestTracker::from_trials(&stored.trials, stored.direction);

    let mut out = format!("Study {} ({})\n\n", stored.name, stored.direction);
    out.push_str(&trials_table(&stored.trials));
    match (best.trial_id(), best.value(), best.params()) {
        (Some(id), Some(value), Some(params)) => {
            out.push_str(&format!("\nBest trial {id}: value {value:.4}\n  {params}\n"));
        }
        _ => out.push_str("\nNo completed trial\n"),
    }
    Ok(out)
}
