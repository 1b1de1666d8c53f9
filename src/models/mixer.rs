//! Mixer network: one time-mixing and one feature-mixing residual block,
//! a temporal projection onto the output steps and a linear head over the
//! projected features joined with the future covariates of each step.
//!
//! Trained with Adam on focal loss over logits. Inputs are standardized with
//! statistics of the training partition.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use backtesting::sigmoid;
use series::{TimeSeries, Timestamp};

use super::{
    check_fit_data, future_timestamps, join_validation, FitData, ForecastContext, Forecaster,
    LossHistory, OutputKind,
};
use crate::error::{AlignmentError, ConfigurationError, TrainingError};
use crate::search_space::ModelConfiguration;

const FOCAL_ALPHA: f64 = 1.0;
const FOCAL_GAMMA: f64 = 2.0;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerParams {
    pub input_chunk_length: usize,
    pub output_chunk_length: usize,
    pub hidden_size: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub random_state: u64,
    /// Epochs without validation improvement before training stops.
    pub patience: usize,
}

impl MixerParams {
    pub fn from_config(config: &ModelConfiguration) -> Result<Self, ConfigurationError> {
        let dropout = config.get_float("dropout")?;
        if !(0.0..1.0).contains(&dropout) {
            return Err(ConfigurationError::OutOfDomain {
                name: "dropout".to_string(),
                value: dropout.to_string(),
            });
        }
        let learning_rate = config.get_float("learning_rate")?;
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(ConfigurationError::OutOfDomain {
                name: "learning_rate".to_string(),
                value: learning_rate.to_string(),
            });
        }
        Ok(Self {
            input_chunk_length: config.get_usize("input_chunk_length", 1)?,
            output_chunk_length: config.get_usize("output_chunk_length", 1)?,
            hidden_size: config.get_usize("hidden_size", 1)?,
            dropout,
            learning_rate,
            batch_size: config.get_usize("batch_size", 1)?,
            n_epochs: config.get_usize("n_epochs", 1)?,
            random_state: config.usize_or("random_state", 42)? as u64,
            patience: config.usize_or("patience", 10)?,
        })
    }
}

/// Layer sizes, fixed at fit time by the series widths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Dims {
    lookback: usize,
    horizon: usize,
    targets: usize,
    past: usize,
    future: usize,
    hidden: usize,
}

impl Dims {
    /// Width of one input row: target, past covariates, future covariates.
    fn features(&self) -> usize {
        self.targets + self.past + self.future
    }

    fn head_in(&self) -> usize {
        self.features() + self.future
    }
}

/// Row-major weight matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Weights {
    /// lookback x lookback
    time_w: Vec<f64>,
    time_b: Vec<f64>,
    /// hidden x features
    feat_w1: Vec<f64>,
    feat_b1: Vec<f64>,
    /// features x hidden
    feat_w2: Vec<f64>,
    feat_b2: Vec<f64>,
    /// horizon x lookback
    proj_w: Vec<f64>,
    proj_b: Vec<f64>,
    /// targets x head_in
    head_w: Vec<f64>,
    head_b: Vec<f64>,
}

fn xavier(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Vec<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    (0..fan_in * fan_out).map(|_| rng.gen_range(-limit..limit)).collect()
}

impl Weights {
    fn init(d: &Dims, rng: &mut StdRng) -> Self {
        let f = d.features();
        Self {
            time_w: xavier(rng, d.lookback, d.lookback),
            time_b: vec![0.0; d.lookback],
            feat_w1: xavier(rng, f, d.hidden),
            feat_b1: vec![0.0; d.hidden],
            feat_w2: xavier(rng, d.hidden, f),
            feat_b2: vec![0.0; f],
            proj_w: xavier(rng, d.lookback, d.horizon),
            proj_b: vec![0.0; d.horizon],
            head_w: xavier(rng, d.head_in(), d.targets),
            head_b: vec![0.0; d.targets],
        }
    }

    fn zeros_like(&self) -> Self {
        let z = |v: &Vec<f64>| vec![0.0; v.len()];
        Self {
            time_w: z(&self.time_w),
            time_b: z(&self.time_b),
            feat_w1: z(&self.feat_w1),
            feat_b1: z(&self.feat_b1),
            feat_w2: z(&self.feat_w2),
            feat_b2: z(&self.feat_b2),
            proj_w: z(&self.proj_w),
            proj_b: z(&self.proj_b),
            head_w: z(&self.head_w),
            head_b: z(&self.head_b),
        }
    }

    fn tensors(&self) -> [&Vec<f64>; 10] {
        [
            &self.time_w,
            &self.time_b,
            &self.feat_w1,
            &self.feat_b1,
            &self.feat_w2,
            &self.feat_b2,
            &self.proj_w,
            &self.proj_b,
            &self.head_w,
            &self.head_b,
        ]
    }

    fn tensors_mut(&mut self) -> [&mut Vec<f64>; 10] {
        [
            &mut self.time_w,
            &mut self.time_b,
            &mut self.feat_w1,
            &mut self.feat_b1,
            &mut self.feat_w2,
            &mut self.feat_b2,
            &mut self.proj_w,
            &mut self.proj_b,
            &mut self.head_w,
            &mut self.head_b,
        ]
    }

    fn clear(&mut self) {
        for t in self.tensors_mut() {
            t.fill(0.0);
        }
    }

    fn scale(&mut self, by: f64) {
        for t in self.tensors_mut() {
            t.iter_mut().for_each(|v| *v *= by);
        }
    }
}

#[derive(Debug, Clone)]
struct Adam {
    m: Weights,
    v: Weights,
    t: i32,
    lr: f64,
}

impl Adam {
    fn new(weights: &Weights, lr: f64) -> Self {
        Self {
            m: weights.zeros_like(),
            v: weights.zeros_like(),
            t: 0,
            lr,
        }
    }

    fn step(&mut self, weights: &mut Weights, grad: &Weights) {
        self.t += 1;
        let c1 = 1.0 - ADAM_BETA1.powi(self.t);
        let c2 = 1.0 - ADAM_BETA2.powi(self.t);
        let lr = self.lr;
        let moments = self.m.tensors_mut().into_iter().zip(self.v.tensors_mut());
        for ((w, g), (m, v)) in weights.tensors_mut().into_iter().zip(grad.tensors()).zip(moments) {
            for i in 0..w.len() {
                m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g[i];
                v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g[i] * g[i];
                w[i] -= lr * (m[i] / c1) / ((v[i] / c2).sqrt() + ADAM_EPS);
            }
        }
    }
}

/// Per-column standardization fitted on the training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Scaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Scaler {
    fn fit(rows: &[f64], width: usize) -> Self {
        let n = (rows.len() / width).max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in rows.chunks(width) {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut var = vec![0.0; width];
        for row in rows.chunks(width) {
            for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        let std = var
            .into_iter()
            .map(|v: f64| if v.sqrt() > 1e-8 { v.sqrt() } else { 1.0 })
            .collect();
        Self { mean, std }
    }

    fn apply(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
            *v = (*v - m) / s;
        }
    }
}

/// Covariate series and timestamp an input row could not be built for.
type Missing = (&'static str, Timestamp);

/// Unscaled input row at `ts`.
fn raw_row(
    target: &[f64],
    ts: Timestamp,
    past: &TimeSeries,
    future: &TimeSeries,
    out: &mut Vec<f64>,
) -> Result<(), Missing> {
    out.extend_from_slice(target);
    out.extend_from_slice(past.row_at(ts).ok_or(("past covariates", ts))?);
    out.extend_from_slice(future.row_at(ts).ok_or(("future covariates", ts))?);
    Ok(())
}

/// Scaled input rows of a series plus its raw labels.
struct Table {
    rows: Vec<f64>,
    labels: Vec<f64>,
    dims: Dims,
}

impl Table {
    fn raw(series: &TimeSeries, past: &TimeSeries, future: &TimeSeries, dims: Dims) -> Result<Self, Missing> {
        let mut rows = Vec::with_capacity(series.len() * dims.features());
        for (i, ts) in series.time_index().iter().enumerate() {
            raw_row(series.row(i), *ts, past, future, &mut rows)?;
        }
        Ok(Self {
            rows,
            labels: series.values().to_vec(),
            dims,
        })
    }

    fn scaled(mut self, scaler: &Scaler) -> Self {
        for row in self.rows.chunks_mut(self.dims.features()) {
            scaler.apply(row);
        }
        self
    }

    fn n_rows(&self) -> usize {
        self.labels.len() / self.dims.targets
    }

    /// Inputs, step future covariates and labels of the sample at `origin`.
    fn sample(&self, origin: usize) -> (&[f64], Vec<f64>, &[f64]) {
        let d = self.dims;
        let f = d.features();
        let window = &self.rows[(origin - d.lookback) * f..origin * f];
        let mut fut = Vec::with_capacity(d.horizon * d.future);
        for h in 0..d.horizon {
            let row = &self.rows[(origin + h) * f..(origin + h + 1) * f];
            fut.extend_from_slice(&row[f - d.future..]);
        }
        let labels = &self.labels[origin * d.targets..(origin + d.horizon) * d.targets];
        (window, fut, labels)
    }

    /// Origins whose whole output window lies at or after `first_target`.
    fn origins(&self, first_target: usize) -> Vec<usize> {
        let last = (self.n_rows() + 1).saturating_sub(self.dims.horizon);
        (first_target.max(self.dims.lookback)..last).collect()
    }
}

struct Dropout<'r> {
    rate: f64,
    rng: &'r mut StdRng,
}

fn mask(dropout: &mut Option<Dropout<'_>>, n: usize) -> Vec<f64> {
    match dropout {
        Some(d) if d.rate > 0.0 => {
            let keep = 1.0 / (1.0 - d.rate);
            (0..n).map(|_| if d.rng.gen::<f64>() < d.rate { 0.0 } else { keep }).collect()
        }
        _ => vec![1.0; n],
    }
}

/// Activations kept for the backward pass.
struct Pass {
    x: Vec<f64>,
    a: Vec<f64>,
    m1: Vec<f64>,
    x1: Vec<f64>,
    a2: Vec<f64>,
    m2: Vec<f64>,
    g: Vec<f64>,
    x2: Vec<f64>,
    head_in: Vec<f64>,
    out: Vec<f64>,
}

fn forward(w: &Weights, d: &Dims, window: &[f64], fut: &[f64], mut dropout: Option<Dropout<'_>>) -> Pass {
    let (l, f, hid, hi) = (d.lookback, d.features(), d.hidden, d.head_in());
    let x = window.to_vec();

    let mut a = vec![0.0; l * f];
    for i in 0..l {
        for j in 0..l {
            let wij = w.time_w[i * l + j];
            for k in 0..f {
                a[i * f + k] += wij * x[j * f + k];
            }
        }
        for k in 0..f {
            a[i * f + k] += w.time_b[i];
        }
    }
    let m1 = mask(&mut dropout, l * f);
    let x1: Vec<f64> = (0..l * f).map(|i| x[i] + a[i].max(0.0) * m1[i]).collect();

    let mut a2 = vec![0.0; l * hid];
    for t in 0..l {
        for k in 0..hid {
            let row = &w.feat_w1[k * f..(k + 1) * f];
            a2[t * hid + k] = w.feat_b1[k] + row.iter().zip(&x1[t * f..(t + 1) * f]).map(|(p, q)| p * q).sum::<f64>();
        }
    }
    let m2 = mask(&mut dropout, l * hid);
    let g: Vec<f64> = (0..l * hid).map(|i| a2[i].max(0.0) * m2[i]).collect();
    let mut x2 = x1.clone();
    for t in 0..l {
        for ff in 0..f {
            let row = &w.feat_w2[ff * hid..(ff + 1) * hid];
            x2[t * f + ff] +=
                w.feat_b2[ff] + row.iter().zip(&g[t * hid..(t + 1) * hid]).map(|(p, q)| p * q).sum::<f64>();
        }
    }

    let mut head_in = vec![0.0; d.horizon * hi];
    for h in 0..d.horizon {
        for t in 0..l {
            let p = w.proj_w[h * l + t];
            for ff in 0..f {
                head_in[h * hi + ff] += p * x2[t * f + ff];
            }
        }
        for ff in 0..f {
            head_in[h * hi + ff] += w.proj_b[h];
        }
        head_in[h * hi + f..(h + 1) * hi].copy_from_slice(&fut[h * d.future..(h + 1) * d.future]);
    }

    let mut out = vec![0.0; d.horizon * d.targets];
    for h in 0..d.horizon {
        let input = &head_in[h * hi..(h + 1) * hi];
        for c in 0..d.targets {
            let row = &w.head_w[c * hi..(c + 1) * hi];
            out[h * d.targets + c] = w.head_b[c] + row.iter().zip(input).map(|(p, q)| p * q).sum::<f64>();
        }
    }

    Pass {
        x,
        a,
        m1,
        x1,
        a2,
        m2,
        g,
        x2,
        head_in,
        out,
    }
}

/// Accumulate into `grad` the gradient of a loss whose derivative with
/// respect to the outputs is `d_out`.
fn backward(w: &Weights, d: &Dims, pass: &Pass, d_out: &[f64], grad: &mut Weights) {
    let (l, f, hid, hi) = (d.lookback, d.features(), d.hidden, d.head_in());

    let mut dz = vec![0.0; d.horizon * f];
    for h in 0..d.horizon {
        for c in 0..d.targets {
            let go = d_out[h * d.targets + c];
            grad.head_b[c] += go;
            for j in 0..hi {
                grad.head_w[c * hi + j] += go * pass.head_in[h * hi + j];
                if j < f {
                    dz[h * f + j] += go * w.head_w[c * hi + j];
                }
            }
        }
    }

    let mut dx2 = vec![0.0; l * f];
    for h in 0..d.horizon {
        grad.proj_b[h] += dz[h * f..(h + 1) * f].iter().sum::<f64>();
        for t in 0..l {
            let p = w.proj_w[h * l + t];
            let mut acc = 0.0;
            for ff in 0..f {
                acc += dz[h * f + ff] * pass.x2[t * f + ff];
                dx2[t * f + ff] += p * dz[h * f + ff];
            }
            grad.proj_w[h * l + t] += acc;
        }
    }

    let mut dx1 = dx2.clone();
    let mut dg = vec![0.0; hid];
    for t in 0..l {
        dg.fill(0.0);
        for ff in 0..f {
            let gv = dx2[t * f + ff];
            grad.feat_b2[ff] += gv;
            for k in 0..hid {
                grad.feat_w2[ff * hid + k] += gv * pass.g[t * hid + k];
                dg[k] += gv * w.feat_w2[ff * hid + k];
            }
        }
        for k in 0..hid {
            if pass.a2[t * hid + k] <= 0.0 {
                continue;
            }
            let da = dg[k] * pass.m2[t * hid + k];
            grad.feat_b1[k] += da;
            for ff in 0..f {
                grad.feat_w1[k * f + ff] += da * pass.x1[t * f + ff];
                dx1[t * f + ff] += da * w.feat_w1[k * f + ff];
            }
        }
    }

    let da: Vec<f64> = (0..l * f)
        .map(|i| if pass.a[i] > 0.0 { dx1[i] * pass.m1[i] } else { 0.0 })
        .collect();
    for i in 0..l {
        grad.time_b[i] += da[i * f..(i + 1) * f].iter().sum::<f64>();
        for j in 0..l {
            let acc: f64 = (0..f).map(|k| da[i * f + k] * pass.x[j * f + k]).sum();
            grad.time_w[i * l + j] += acc;
        }
    }
}

/// Focal loss of one logit and its derivative with respect to the logit.
fn focal(logit: f64, y: f64) -> (f64, f64) {
    let p = sigmoid(logit).clamp(1e-7, 1.0 - 1e-7);
    let q = 1.0 - p;
    let pos_loss = -q.powf(FOCAL_GAMMA) * p.ln();
    let neg_loss = -p.powf(FOCAL_GAMMA) * q.ln();
    let pos_grad = FOCAL_GAMMA * p * q.powf(FOCAL_GAMMA) * p.ln() - q.powf(FOCAL_GAMMA + 1.0);
    let neg_grad = p.powf(FOCAL_GAMMA + 1.0) - FOCAL_GAMMA * q * p.powf(FOCAL_GAMMA) * q.ln();
    (
        FOCAL_ALPHA * (y * pos_loss + (1.0 - y) * neg_loss),
        FOCAL_ALPHA * (y * pos_grad + (1.0 - y) * neg_grad),
    )
}

/// Mean focal loss over the samples at `origins`, without dropout.
fn evaluate_loss(w: &Weights, d: &Dims, table: &Table, origins: &[usize]) -> f64 {
    let mut total = 0.0;
    for &o in origins {
        let (window, fut, labels) = table.sample(o);
        let pass = forward(w, d, window, &fut, None);
        total += pass.out.iter().zip(labels).map(|(&z, &y)| focal(z, y).0).sum::<f64>();
    }
    total / (origins.len() * d.horizon * d.targets).max(1) as f64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fitted {
    dims: Dims,
    weights: Weights,
    scaler: Scaler,
    components: Vec<String>,
}

/// Time/feature mixing network over fixed-length input windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerModel {
    params: MixerParams,
    fitted: Option<Fitted>,
    history: LossHistory,
    #[serde(skip)]
    optimizer: Option<Adam>,
}

impl MixerModel {
    pub fn new(params: MixerParams) -> Self {
        Self {
            params,
            fitted: None,
            history: LossHistory::default(),
            optimizer: None,
        }
    }

    pub fn params(&self) -> &MixerParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Whether optimizer state from the last fit is still held.
    pub fn holds_training_state(&self) -> bool {
        self.optimizer.is_some()
    }
}

impl Forecaster for MixerModel {
    fn fit(&mut self, data: &FitData<'_>) -> Result<(), TrainingError> {
        check_fit_data(data)?;
        let p = &self.params;
        let dims = Dims {
            lookback: p.input_chunk_length,
            horizon: p.output_chunk_length,
            targets: data.series.n_components(),
            past: data.past_covariates.n_components(),
            future: data.future_covariates.n_components(),
            hidden: p.hidden_size,
        };
        let coverage = |(covariates, missing): Missing| TrainingError::CovariateCoverage { covariates, missing };

        let raw = Table::raw(data.series, data.past_covariates, data.future_covariates, dims).map_err(coverage)?;
        let scaler = Scaler::fit(&raw.rows, dims.features());
        let train = raw.scaled(&scaler);
        let train_origins = train.origins(0);
        if train_origins.is_empty() {
            return Err(TrainingError::InsufficientHistory {
                required: dims.lookback + dims.horizon,
                available: train.n_rows(),
            });
        }

        let val = match join_validation(data) {
            Some((joined, offset)) => {
                let table = Table::raw(&joined, data.past_covariates, data.future_covariates, dims)
                    .map_err(coverage)?
                    .scaled(&scaler);
                let origins = table.origins(offset);
                Some((table, origins)).filter(|(_, o)| !o.is_empty())
            }
            None => None,
        };

        let mut rng = StdRng::seed_from_u64(p.random_state);
        let mut weights = Weights::init(&dims, &mut rng);
        let mut grad = weights.zeros_like();
        let mut adam = Adam::new(&weights, p.learning_rate);
        let mut order = train_origins.clone();
        let mut history = LossHistory::default();
        let mut best: Option<(f64, Weights)> = None;
        let mut stale = 0;

        for epoch in 0..p.n_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for batch in order.chunks(p.batch_size) {
                grad.clear();
                let norm = (batch.len() * dims.horizon * dims.targets) as f64;
                for &o in batch {
                    let (window, fut, labels) = train.sample(o);
                    let dropout = Dropout {
                        rate: p.dropout,
                        rng: &mut rng,
                    };
                    let pass = forward(&weights, &dims, window, &fut, Some(dropout));
                    let mut d_out = Vec::with_capacity(pass.out.len());
                    for (&z, &y) in pass.out.iter().zip(labels) {
                        let (loss, dz) = focal(z, y);
                        epoch_loss += loss;
                        d_out.push(dz);
                    }
                    backward(&weights, &dims, &pass, &d_out, &mut grad);
                }
                grad.scale(1.0 / norm);
                adam.step(&mut weights, &grad);
            }
            let train_loss = epoch_loss / (train_origins.len() * dims.horizon * dims.targets) as f64;
            if !train_loss.is_finite() {
                return Err(TrainingError::Diverged(format!("epoch {epoch}: train loss {train_loss}")));
            }
            history.train.push(train_loss);

            let Some((table, origins)) = &val else {
                continue;
            };
            let val_loss = evaluate_loss(&weights, &dims, table, origins);
            history.val.push(val_loss);
            debug!(epoch, train_loss, val_loss, "mixer epoch");
            match &best {
                Some((b, _)) if val_loss >= *b => {
                    stale += 1;
                    if stale >= p.patience {
                        debug!(epoch, best = *b, "early stopping");
                        break;
                    }
                }
                _ => {
                    best = Some((val_loss, weights.clone()));
                    stale = 0;
                }
            }
        }

        if let Some((_, best_weights)) = best {
            weights = best_weights;
        }
        self.fitted = Some(Fitted {
            dims,
            weights,
            scaler,
            components: data.series.components().to_vec(),
        });
        self.history = history;
        self.optimizer = Some(adam);
        Ok(())
    }

    fn predict(&self, n: usize, ctx: &ForecastContext<'_>) -> Result<TimeSeries, AlignmentError> {
        let fitted = self.fitted.as_ref().ok_or(AlignmentError::NotFitted)?;
        let d = fitted.dims;
        let available = ctx.series.len();
        if available < d.lookback {
            return Err(AlignmentError::InsufficientHistory {
                position: available,
                required: d.lookback,
                available,
            });
        }
        let widths = [
            ("target", d.targets, ctx.series.n_components()),
            ("past covariate", d.past, ctx.past_covariates.n_components()),
            ("future covariate", d.future, ctx.future_covariates.n_components()),
        ];
        for (what, expected, actual) in widths {
            if expected != actual {
                return Err(AlignmentError::WidthMismatch { what, expected, actual });
            }
        }
        let exhausted = |(covariates, at): Missing| AlignmentError::CovariatesExhausted { covariates, at };

        let history = ctx.series.tail(d.lookback);
        let mut rows = Table::raw(&history, ctx.past_covariates, ctx.future_covariates, d)
            .map_err(exhausted)?
            .scaled(&fitted.scaler)
            .rows;
        let ahead = future_timestamps(ctx.series, ctx.future_covariates, ctx.past_covariates, n)?;
        let f = d.features();

        let mut out = Vec::with_capacity(n * d.targets);
        let mut produced = 0;
        while produced < n {
            let steps = d.horizon.min(n - produced);
            let mut fut = vec![0.0; d.horizon * d.future];
            for h in 0..steps {
                let ts = ahead[produced + h];
                let row = ctx.future_covariates.row_at(ts).ok_or(("future covariates", ts)).map_err(exhausted)?;
                let mut scaled = vec![0.0; d.targets + d.past];
                scaled.extend_from_slice(row);
                fitted.scaler.apply(&mut scaled);
                fut[h * d.future..(h + 1) * d.future].copy_from_slice(&scaled[f - d.future..]);
            }

            let window = &rows[rows.len() - d.lookback * f..];
            let pass = forward(&fitted.weights, &d, window, &fut, None);
            let chunk = &pass.out[..steps * d.targets];
            out.extend_from_slice(chunk);

            if produced + steps < n {
                for h in 0..steps {
                    let ts = ahead[produced + h];
                    let probs: Vec<f64> = chunk[h * d.targets..(h + 1) * d.targets].iter().map(|z| sigmoid(*z)).collect();
                    let start = rows.len();
                    raw_row(&probs, ts, ctx.past_covariates, ctx.future_covariates, &mut rows)
                        .map_err(exhausted)?;
                    fitted.scaler.apply(&mut rows[start..]);
                }
            }
            produced += steps;
        }

        Ok(TimeSeries::new(ahead, fitted.components.clone(), out)?)
    }

    fn input_length(&self) -> usize {
        self.params.input_chunk_length
    }

    fn output_length(&self) -> usize {
        self.params.output_chunk_length
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Logit
    }

    fn loss_history(&self) -> &LossHistory {
        &self.history
    }

    fn release(&mut self) {
        self.optimizer = None;
    }
}
