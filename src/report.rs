//! Charts of a scored backtest and of training losses, plus study summaries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use plotters::prelude::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use backtesting::ClassificationReport;

use crate::evaluator::Evaluation;
use crate::models::LossHistory;
use crate::search_space::ModelConfiguration;
use crate::study::{Study, Trial, TrialStatus};

/// Plot forecast probabilities against the true labels of the first target.
///
/// Labels are drawn as markers (green for 1, red for 0), the probabilities as
/// a line and the decision threshold as a horizontal rule.
pub fn plot_backtest<P: AsRef<Path>>(
    evaluation: &Evaluation,
    threshold: f64,
    output_path: P,
) -> Result<(), Box<dyn std::error::Error>> {
    let truth = evaluation.truth.column(0);
    let probs = evaluation.forecast.column(0);
    if truth.is_empty() {
        return Err("nothing to plot: empty backtest".into());
    }
    let n = truth.len();

    let root = BitMapBackend::new(output_path.as_ref(), (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let caption = format!("Backtest vs actual (precision {:.3})", evaluation.score);
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0usize..n, -0.05f64..1.05f64)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("step")
        .y_desc("probability")
        .draw()?;

    chart
        .draw_series(LineSeries::new(probs.iter().enumerate().map(|(i, p)| (i, *p)), &BLUE))?
        .label("Forecast")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .draw_series(LineSeries::new(vec![(0, threshold), (n - 1, threshold)], &BLACK))?
        .label("Threshold")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLACK));

    chart
        .draw_series(truth.iter().enumerate().map(|(i, &y)| {
            let color = if y == 1.0 { GREEN } else { RED };
            Circle::new((i, y), 5, ShapeStyle::from(&color).filled())
        }))?
        .label("Actual")
        .legend(|(x, y)| Circle::new((x, y), 5, ShapeStyle::from(&GREEN).filled()));

    chart.configure_series_labels().border_style(&BLACK).draw()?;
    root.present()?;
    Ok(())
}

/// Plot per-iteration train and validation losses.
pub fn plot_loss_history<P: AsRef<Path>>(
    history: &LossHistory,
    output_path: P,
) -> Result<(), Box<dyn std::error::Error>> {
    if history.train.is_empty() {
        return Err("nothing to plot: empty loss history".into());
    }
    let n = history.train.len().max(history.val.len());
    let all = history.train.iter().chain(&history.val).cloned();
    let min_loss = all.clone().fold(f64::INFINITY, f64::min);
    let max_loss = all.fold(f64::NEG_INFINITY, f64::max);
    let pad = ((max_loss - min_loss) * 0.05).max(1e-6);

    let root = BitMapBackend::new(output_path.as_ref(), (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Training Loss", ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0usize..n, (min_loss - pad)..(max_loss + pad))?;

    chart.configure_mesh().x_desc("iteration").y_desc("loss").draw()?;

    chart
        .draw_series(LineSeries::new(history.train.iter().enumerate().map(|(i, l)| (i, *l)), &BLUE))?
        .label("Train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    if !history.val.is_empty() {
        chart
            .draw_series(LineSeries::new(history.val.iter().enumerate().map(|(i, l)| (i, *l)), &RED))?
            .label("Validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    }

    chart.configure_series_labels().border_style(&BLACK).draw()?;
    root.present()?;
    Ok(())
}

/// Best result of a study, as written next to the journal.
#[derive(Debug, Clone, Serialize)]
pub struct BestTrialReport {
    pub study: String,
    pub trial: u64,
    pub value: f64,
    pub params: ModelConfiguration,
    pub finished_at: Option<DateTime<Utc>>,
    pub n_trials: usize,
    pub n_failed: usize,
    /// Full scoring of the best configuration, when it was re-evaluated.
    pub evaluation: Option<ClassificationReport>,
}

impl BestTrialReport {
    /// `None` when no trial of the study completed.
    pub fn from_study(study: &Study, evaluation: Option<ClassificationReport>) -> Option<Self> {
        let best = study.best_trial()?;
        Some(Self {
            study: study.name().to_string(),
            trial: best.id,
            value: best.value?,
            params: best.params.clone(),
            finished_at: best.finished_at,
            n_trials: study.trials().len(),
            n_failed: study.trials().iter().filter(|t| t.status == TrialStatus::Failed).count(),
            evaluation,
        })
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).context("Failed to serialize best trial report")?;
        Ok(())
    }
}

/// One line per trial: id, status, value and parameters.
pub fn trials_table(trials: &[Trial]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>6}  {:<9} {:>8}  params", "trial", "status", "value");
    for trial in trials {
        let status = match trial.status {
            TrialStatus::Running => "running",
            TrialStatus::Complete => "complete",
            TrialStatus::Failed => "failed",
        };
        let value = trial.value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        let _ = write!(out, "{:>6}  {:<9} {:>8}  {}", trial.id, status, value, trial.params);
        if let Some(err) = &trial.error {
            let _ = write!(out, "  ({err})");
        }
        out.push('\n');
    }
    out
}
