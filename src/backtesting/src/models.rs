use serde::{Deserialize, Serialize};

/// Confusion-matrix cells for a binary classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Predicted 1, label 1.
    pub true_positives: usize,
    /// Predicted 1, label 0.
    pub false_positives: usize,
    /// Predicted 0, label 0.
    pub true_negatives: usize,
    /// Predicted 0, label 1.
    pub false_negatives: usize,
}

impl ConfusionCounts {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// Number of positive predictions.
    pub fn predicted_positive(&self) -> usize {
        self.true_positives + self.false_positives
    }

    /// Number of positive labels.
    pub fn actual_positive(&self) -> usize {
        self.true_positives + self.false_negatives
    }
}

/// Scored outcome of one binary backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Decision threshold applied to the probabilities.
    pub threshold: f64,
    /// Number of scored points.
    pub n_samples: usize,
    pub confusion: ConfusionCounts,
    /// TP / (TP + FP), 0 when nothing was predicted positive.
    pub precision: f64,
    /// TP / (TP + FN), 0 when there are no positive labels.
    pub recall: f64,
    pub accuracy: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Share of positive labels in the window.
    pub base_rate: f64,
}
