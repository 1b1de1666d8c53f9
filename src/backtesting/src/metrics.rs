use rustc_hash::FxHashMap;

use crate::error::MetricsError;
use crate::models::{ClassificationReport, ConfusionCounts};

/// Logistic function, used to turn logits into probabilities.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Map probabilities to 0/1 decisions. A value equal to the threshold is
/// negative.
pub fn binarize(probabilities: &[f64], threshold: f64) -> Vec<u8> {
    probabilities
        .iter()
        .map(|&p| u8::from(p > threshold))
        .collect()
}

/// Check every label is exactly 0.0 or 1.0.
pub fn validate_labels(labels: &[f64]) -> Result<(), MetricsError> {
    match labels
        .iter()
        .enumerate()
        .find(|(_, &v)| v != 0.0 && v != 1.0)
    {
        Some((position, &value)) => Err(MetricsError::InvalidLabel { position, value }),
        None => Ok(()),
    }
}

/// Count confusion cells of binary `predicted` against `truth` labels.
pub fn confusion(truth: &[f64], predicted: &[u8]) -> Result<ConfusionCounts, MetricsError> {
    if truth.len() != predicted.len() {
        return Err(MetricsError::LengthMismatch {
            truth: truth.len(),
            predicted: predicted.len(),
        });
    }
    validate_labels(truth)?;

    let mut counts = ConfusionCounts::default();
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t == 1.0, p == 1) {
            (true, true) => counts.true_positives += 1,
            (false, true) => counts.false_positives += 1,
            (false, false) => counts.true_negatives += 1,
            (true, false) => counts.false_negatives += 1,
        }
    }
    Ok(counts)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// TP / (TP + FP); 0 when there are no positive predictions.
pub fn precision(counts: &ConfusionCounts) -> f64 {
    ratio(counts.true_positives, counts.predicted_positive())
}

/// TP / (TP + FN); 0 when there are no positive labels.
pub fn recall(counts: &ConfusionCounts) -> f64 {
    ratio(counts.true_positives, counts.actual_positive())
}

/// Score probabilities against binary labels at `threshold`.
pub fn classification_report(
    truth: &[f64],
    probabilities: &[f64],
    threshold: f64,
) -> Result<ClassificationReport, MetricsError> {
    if truth.is_empty() {
        return Err(MetricsError::Empty);
    }
    let predicted = binarize(probabilities, threshold);
    let counts = confusion(truth, &predicted)?;

    let precision = precision(&counts);
    let recall = recall(&counts);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    Ok(ClassificationReport {
        threshold,
        n_samples: counts.total(),
        confusion: counts,
        precision,
        recall,
        accuracy: ratio(counts.true_positives + counts.true_negatives, counts.total()),
        f1,
        base_rate: ratio(counts.actual_positive(), counts.total()),
    })
}

impl ClassificationReport {
    /// Named metrics, for logging and trial attributes.
    pub fn as_metrics(&self) -> FxHashMap<String, f64> {
        let mut metrics = FxHashMap::default();
        metrics.insert("Precision".to_string(), self.precision);
        metrics.insert("Recall".to_string(), self.recall);
        metrics.insert("Accuracy".to_string(), self.accuracy);
        metrics.insert("F1".to_string(), self.f1);
        metrics.insert("Base Rate".to_string(), self.base_rate);
        metrics.insert(
            "Positive Predictions".to_string(),
            self.confusion.predicted_positive() as f64,
        );
        metrics
    }
}
