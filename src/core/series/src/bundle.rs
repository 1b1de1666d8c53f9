use serde::{Deserialize, Serialize};

use crate::error::SeriesError;
use crate::timeseries::TimeSeries;

/// The partition set handed to every trial.
///
/// Built once per run by a [`DataProvider`](crate::DataProvider) and only ever
/// shared by reference afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesBundle {
    pub train: TimeSeries,
    pub val: TimeSeries,
    pub test: TimeSeries,
    pub past_covariates: TimeSeries,
    pub future_covariates: TimeSeries,
}

impl SeriesBundle {
    /// Check the bundle invariants for an evaluation over `pred_steps` points.
    ///
    /// `test` must hold at least `pred_steps` points and both covariate series
    /// must contain every timestamp of train, val and test.
    pub fn validate(&self, pred_steps: usize) -> Result<(), SeriesError> {
        for (partition, series) in [("train", &self.train), ("val", &self.val)] {
            if series.is_empty() {
                return Err(SeriesError::PartitionTooShort {
                    partition,
                    required: 1,
                    actual: 0,
                });
            }
        }
        if self.test.len() < pred_steps.max(1) {
            return Err(SeriesError::PartitionTooShort {
                partition: "test",
                required: pred_steps.max(1),
                actual: self.test.len(),
            });
        }

        let covariates = [
            ("past_covariates", &self.past_covariates),
            ("future_covariates", &self.future_covariates),
        ];
        let partitions = [
            ("train", &self.train),
            ("val", &self.val),
            ("test", &self.test),
        ];
        for (cov_name, cov) in covariates {
            for (partition, series) in partitions {
                if let Some(missing) = cov.first_uncovered(series) {
                    return Err(SeriesError::CovariateCoverage {
                        covariates: cov_name,
                        partition,
                        missing,
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of target components.
    pub fn n_targets(&self) -> usize {
        self.train.n_components()
    }
}
