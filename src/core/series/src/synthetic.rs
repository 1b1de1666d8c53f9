use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::bundle::SeriesBundle;
use crate::error::SeriesError;
use crate::provider::{
    calendar_covariates, split_bundle, to_direction_labels, DataMode, DataProvider, SplitLengths,
};
use crate::timeseries::{TimeSeries, Timestamp};

/// Seeded random-walk prices on a daily index.
///
/// Each target follows a drifting walk whose step sign is mildly
/// autocorrelated, so direction labels carry a learnable signal. Past
/// covariates are the previous-day returns, future covariates are calendar
/// features.
#[derive(Debug, Clone)]
pub struct SyntheticDataProvider {
    pub n_points: usize,
    pub n_targets: usize,
    pub seed: u64,
    pub lengths: SplitLengths,
}

impl SyntheticDataProvider {
    pub fn new(n_points: usize, n_targets: usize, seed: u64, lengths: SplitLengths) -> Self {
        Self {
            n_points,
            n_targets,
            seed,
            lengths,
        }
    }

    fn index(&self) -> Vec<Timestamp> {
        let origin = Utc
            .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        (0..self.n_points)
            .map(|i| origin + Duration::days(i as i64))
            .collect()
    }

    /// Generate the raw price columns.
    pub fn prices(&self) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.n_targets)
            .map(|_| {
                let mut price = 100.0_f64;
                let mut last_step = 0.0_f64;
                (0..self.n_points)
                    .map(|_| {
                        let noise: f64 = rng.gen_range(-1.0..1.0);
                        let step = 0.3 * last_step.signum() + noise;
                        last_step = step;
                        price = (price + step).max(1.0);
                        price
                    })
                    .collect()
            })
            .collect()
    }
}

impl DataProvider for SyntheticDataProvider {
    fn get_series_bundle(&self, mode: DataMode, binary: bool) -> Result<SeriesBundle, SeriesError> {
        let index = self.index();
        let names: Vec<String> = (0..self.n_targets).map(|i| format!("asset_{i}")).collect();
        let prices = self.prices();
        let raw = TimeSeries::from_columns(index.clone(), names.clone(), &prices)?;

        let returns: Vec<Vec<f64>> = prices
            .iter()
            .map(|col| {
                std::iter::once(0.0)
                    .chain(col.windows(2).map(|w| w[1] / w[0] - 1.0))
                    .collect()
            })
            .collect();
        let return_names = names.iter().map(|n| format!("{n}_return")).collect();
        let past = TimeSeries::from_columns(index.clone(), return_names, &returns)?;
        let future = calendar_covariates(&index)?;

        let target = if binary { to_direction_labels(&raw)? } else { raw };
        debug!(
            points = self.n_points,
            targets = self.n_targets,
            seed = self.seed,
            "generated synthetic series"
        );
        split_bundle(&target, past, future, &self.lengths, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_bundle() {
        let a = SyntheticDataProvider::new(300, 2, 7, SplitLengths::default());
        let b = SyntheticDataProvider::new(300, 2, 7, SplitLengths::default());
        let ba = a.get_series_bundle(DataMode::Training, true).unwrap();
        let bb = b.get_series_bundle(DataMode::Training, true).unwrap();
        assert_eq!(ba.train, bb.train);
        assert_eq!(ba.test, bb.test);
    }

    #[test]
    fn test_labels_are_binary_and_covariates_cover() {
        let provider = SyntheticDataProvider::new(250, 1, 1, SplitLengths::default());
        let bundle = provider.get_series_bundle(DataMode::Training, true).unwrap();
        assert!(bundle.train.values().iter().all(|v| *v == 0.0 || *v == 1.0));
        assert!(bundle.past_covariates.covers(&bundle.test));
        assert!(bundle.future_covariates.covers(&bundle.train));
        assert_eq!(bundle.n_targets(), 1);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = SyntheticDataProvider::new(100, 1, 1, SplitLengths::default()).prices();
        let b = SyntheticDataProvider::new(100, 1, 2, SplitLengths::default()).prices();
        assert_ne!(a, b);
    }
}
