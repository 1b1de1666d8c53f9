//! Histogram-based, leaf-wise gradient boosting on dense feature matrices.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use backtesting::sigmoid;

/// Training objective of a booster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loss {
    /// Binary log-loss on raw scores; predictions pass through a sigmoid.
    Logistic,
    /// Squared error; predictions are raw scores.
    Squared,
}

impl Loss {
    fn initial_score(self, y: &[f64]) -> f64 {
        let mean = y.iter().sum::<f64>() / y.len().max(1) as f64;
        match self {
            Loss::Logistic => {
                let p = mean.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Loss::Squared => mean,
        }
    }

    fn gradient(self, score: f64, y: f64) -> (f64, f64) {
        match self {
            Loss::Logistic => {
                let p = sigmoid(score);
                (p - y, (p * (1.0 - p)).max(1e-12))
            }
            Loss::Squared => (score - y, 1.0),
        }
    }

    fn value(self, score: f64, y: f64) -> f64 {
        match self {
            Loss::Logistic => {
                let p = sigmoid(score).clamp(1e-15, 1.0 - 1e-15);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            }
            Loss::Squared => (score - y).powi(2),
        }
    }

    pub fn transform(self, score: f64) -> f64 {
        match self {
            Loss::Logistic => sigmoid(score),
            Loss::Squared => score,
        }
    }

    fn mean(self, scores: &[f64], y: &[f64]) -> f64 {
        scores.iter().zip(y).map(|(&s, &t)| self.value(s, t)).sum::<f64>() / y.len().max(1) as f64
    }
}

/// Boosting hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingConfig {
    pub learning_rate: f64,
    pub n_estimators: usize,
    pub num_leaves: usize,
    pub min_child_samples: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub reg_lambda: f64,
    pub max_bin: usize,
    /// Stop after this many rounds without validation improvement; 0 disables.
    pub early_stopping_rounds: usize,
    pub seed: u64,
}

/// Row-major feature matrix with one label per row.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub n_features: usize,
}

impl Dataset<'_> {
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    fn row(&self, i: usize) -> &[f64] {
        &self.x[i * self.n_features..(i + 1) * self.n_features]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// A regression tree; `x <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    i = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Fitted ensemble for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    loss: Loss,
    init: f64,
    trees: Vec<Tree>,
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl Booster {
    pub fn predict_raw(&self, x: &[f64]) -> f64 {
        self.init + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.loss.transform(self.predict_raw(x))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }
}

/// Per-feature split thresholds; value `x` falls in bin `#{t : t < x}`.
struct Bins {
    thresholds: Vec<Vec<f64>>,
    binned: Vec<u16>,
    n_features: usize,
}

impl Bins {
    fn build(data: &Dataset<'_>, max_bin: usize) -> Self {
        let n = data.n_rows();
        let d = data.n_features;
        let max_bin = max_bin.clamp(2, u16::MAX as usize);
        let mut thresholds = Vec::with_capacity(d);
        for f in 0..d {
            let mut col: Vec<f64> = (0..n).map(|i| data.x[i * d + f]).collect();
            col.sort_by(f64::total_cmp);
            col.dedup();
            let mut cuts: Vec<f64> = if col.len() <= max_bin {
                col[..col.len().saturating_sub(1)].to_vec()
            } else {
                (1..max_bin).map(|q| col[q * col.len() / max_bin]).collect()
            };
            cuts.dedup();
            thresholds.push(cuts);
        }

        let mut binned = vec![0u16; n * d];
        for i in 0..n {
            for f in 0..d {
                let x = data.x[i * d + f];
                binned[i * d + f] = thresholds[f].partition_point(|t| *t < x) as u16;
            }
        }
        Self {
            thresholds,
            binned,
            n_features: d,
        }
    }

    fn bin(&self, row: usize, feature: usize) -> usize {
        self.binned[row * self.n_features + feature] as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    threshold: f64,
    gain: f64,
}

struct LeafState {
    node: usize,
    rows: Vec<usize>,
    g: f64,
    h: f64,
    best: Option<SplitCandidate>,
}

struct Grower<'a> {
    bins: &'a Bins,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    config: &'a BoostingConfig,
}

impl Grower<'_> {
    fn leaf(&self, node: usize, rows: Vec<usize>) -> LeafState {
        let g = rows.iter().map(|&r| self.grad[r]).sum();
        let h = rows.iter().map(|&r| self.hess[r]).sum();
        let best = self.best_split(&rows, g, h);
        LeafState { node, rows, g, h, best }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.reg_lambda).max(1e-12)
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let min_child = self.config.min_child_samples.max(1);
        if rows.len() < 2 * min_child {
            return None;
        }
        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;

        for &f in self.features {
            let cuts = &self.bins.thresholds[f];
            if cuts.is_empty() {
                continue;
            }
            let mut hist = vec![(0.0_f64, 0.0_f64, 0_usize); cuts.len() + 1];
            for &r in rows {
                let cell = &mut hist[self.bins.bin(r, f)];
                cell.0 += self.grad[r];
                cell.1 += self.hess[r];
                cell.2 += 1;
            }

            let (mut lg, mut lh, mut lc) = (0.0, 0.0, 0);
            for (b, &(cg, ch, cc)) in hist.iter().enumerate().take(cuts.len()) {
                lg += cg;
                lh += ch;
                lc += cc;
                if lc < min_child {
                    continue;
                }
                if rows.len() - lc < min_child {
                    break;
                }
                let (rg, rh) = (g - lg, h - lh);
                if lh < 1e-3 || rh < 1e-3 {
                    continue;
                }
                let gain = self.score(lg, lh) + self.score(rg, rh) - parent;
                if gain > 1e-12 && best.map_or(true, |s| gain > s.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin: b,
                        threshold: cuts[b],
                        gain,
                    });
                }
            }
        }
        best
    }

    fn grow(&self, rows: Vec<usize>) -> Tree {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut open = vec![self.leaf(0, rows)];
        let mut done: Vec<LeafState> = Vec::new();

        while open.len() + done.len() < self.config.num_leaves.max(2) {
            let pick = open
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.best.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((i, _)) = pick else { break };
            let leaf = open.swap_remove(i);
            let Some(split) = leaf.best else {
                done.push(leaf);
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .copied()
                .partition(|&r| self.bins.bin(r, split.feature) <= split.bin);
            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            open.push(self.leaf(left, left_rows));
            open.push(self.leaf(right, right_rows));
        }

        for leaf in open.into_iter().chain(done) {
            let value = -leaf.g / (leaf.h + self.config.reg_lambda).max(1e-12) * self.config.learning_rate;
            nodes[leaf.node] = Node::Leaf { value };
        }
        Tree { nodes }
    }
}

/// Fit a booster on `train`, tracking loss on `val` when given.
pub fn train_booster(
    config: &BoostingConfig,
    loss: Loss,
    train: &Dataset<'_>,
    val: Option<&Dataset<'_>>,
) -> Booster {
    let n = train.n_rows();
    let d = train.n_features;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let bins = Bins::build(train, config.max_bin);

    let init = loss.initial_score(train.y);
    let mut scores = vec![init; n];
    let mut val_scores = val.map(|v| vec![init; v.n_rows()]);
    let mut grad = vec![0.0; n];
    let mut hess = vec![0.0; n];

    let mut booster = Booster {
        loss,
        init,
        trees: Vec::with_capacity(config.n_estimators),
        train_loss: Vec::new(),
        val_loss: Vec::new(),
    };
    let n_cols = ((config.colsample_bytree * d as f64).ceil() as usize).clamp(1, d.max(1));
    let mut best_val = f64::INFINITY;
    let mut best_iter = 0;

    for iter in 0..config.n_estimators {
        for i in 0..n {
            let (g, h) = loss.gradient(scores[i], train.y[i]);
            grad[i] = g;
            hess[i] = h;
        }

        let rows: Vec<usize> = if config.subsample < 1.0 {
            let picked: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < config.subsample).collect();
            if picked.len() >= 2 * config.min_child_samples.max(1) {
                picked
            } else {
                (0..n).collect()
            }
        } else {
            (0..n).collect()
        };
        let mut features: Vec<usize> = if n_cols < d {
            sample(&mut rng, d, n_cols).into_vec()
        } else {
            (0..d).collect()
        };
        features.sort_unstable();

        let tree = Grower {
            bins: &bins,
            grad: &grad,
            hess: &hess,
            features: &features,
            config,
        }
        .grow(rows);

        for (i, s) in scores.iter_mut().enumerate() {
            *s += tree.predict(train.row(i));
        }
        booster.train_loss.push(loss.mean(&scores, train.y));

        if let (Some(v), Some(vs)) = (val, val_scores.as_mut()) {
            for (i, s) in vs.iter_mut().enumerate() {
                *s += tree.predict(v.row(i));
            }
            let current = loss.mean(vs, v.y);
            booster.val_loss.push(current);
            if current < best_val {
                best_val = current;
                best_iter = iter;
            }
        }
        booster.trees.push(tree);

        if val.is_some()
            && config.early_stopping_rounds > 0
            && iter - best_iter >= config.early_stopping_rounds
        {
            booster.trees.truncate(best_iter + 1);
            break;
        }
    }
    booster
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BoostingConfig {
        BoostingConfig {
            learning_rate: 0.2,
            n_estimators: 40,
            num_leaves: 8,
            min_child_samples: 3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            reg_lambda: 0.0,
            max_bin: 63,
            early_stopping_rounds: 0,
            seed: 42,
        }
    }

    /// Label is 1 when the second feature exceeds 0.5; the first is noise.
    fn threshold_data(n: usize) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(1);
        let mut x = Vec::with_capacity(n * 2);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let a: f64 = rng.gen();
            let b: f64 = rng.gen();
            x.extend([a, b]);
            y.push(if b > 0.5 { 1.0 } else { 0.0 });
        }
        (x, y)
    }

    #[test]
    fn test_logistic_booster_learns_threshold() {
        let (x, y) = threshold_data(200);
        let data = Dataset { x: &x, y: &y, n_features: 2 };
        let booster = train_booster(&config(), Loss::Logistic, &data, None);

        assert_eq!(booster.n_trees(), 40);
        assert!(booster.predict(&[0.3, 0.9]) > 0.9);
        assert!(booster.predict(&[0.3, 0.1]) < 0.1);
        let losses = &booster.train_loss;
        assert!(losses.last().unwrap() < losses.first().unwrap());
    }

    #[test]
    fn test_squared_booster_fits_mean_shift() {
        let (x, y) = threshold_data(200);
        let y: Vec<f64> = y.iter().map(|v| v * 10.0).collect();
        let data = Dataset { x: &x, y: &y, n_features: 2 };
        let booster = train_booster(&config(), Loss::Squared, &data, None);
        assert!((booster.predict(&[0.5, 0.95]) - 10.0).abs() < 1.0);
        assert!(booster.predict(&[0.5, 0.05]).abs() < 1.0);
    }

    #[test]
    fn test_num_leaves_and_min_child_respected() {
        let (x, y) = threshold_data(100);
        let data = Dataset { x: &x, y: &y, n_features: 2 };
        let mut cfg = config();
        cfg.num_leaves = 4;
        cfg.n_estimators = 3;
        let booster = train_booster(&cfg, Loss::Logistic, &data, None);
        assert!(booster.trees.iter().all(|t| t.n_leaves() <= 4));

        cfg.min_child_samples = 60;
        let stump = train_booster(&cfg, Loss::Logistic, &data, None);
        assert!(stump.trees.iter().all(|t| t.n_leaves() == 1));
    }

    #[test]
    fn test_early_stopping_truncates_to_best_iteration() {
        let (x, y) = threshold_data(200);
        // validation labels are the opposite rule, so val loss worsens quickly
        let flipped: Vec<f64> = y.iter().map(|v| 1.0 - v).collect();
        let train = Dataset { x: &x, y: &y, n_features: 2 };
        let val = Dataset { x: &x, y: &flipped, n_features: 2 };
        let mut cfg = config();
        cfg.early_stopping_rounds = 5;
        let booster = train_booster(&cfg, Loss::Logistic, &train, Some(&val));
        assert!(booster.n_trees() < 40);
        assert_eq!(booster.val_loss.len(), booster.n_trees() + 5);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let (x, y) = threshold_data(150);
        let data = Dataset { x: &x, y: &y, n_features: 2 };
        let mut cfg = config();
        cfg.subsample = 0.7;
        cfg.colsample_bytree = 0.5;
        let a = train_booster(&cfg, Loss::Logistic, &data, None);
        let b = train_booster(&cfg, Loss::Logistic, &data, None);
        assert_eq!(a, b);
    }
}
