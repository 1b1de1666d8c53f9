//! Samplers that pick a value for one parameter given the trial history.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::search_space::{Domain, ParameterValue};
use crate::study::{Direction, Trial, TrialStatus};

/// Draws a value from a validated domain.
pub trait Sampler {
    fn sample(
        &mut self,
        name: &str,
        domain: &Domain,
        history: &[Trial],
        direction: Direction,
    ) -> ParameterValue;
}

/// Uniform draw; log-uniform for log float ranges.
fn sample_uniform(rng: &mut StdRng, domain: &Domain) -> ParameterValue {
    match domain {
        Domain::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
        Domain::FloatRange { low, high, log } => {
            if low == high {
                return ParameterValue::Float(*low);
            }
            if *log {
                let x = rng.gen_range(low.ln()..=high.ln());
                ParameterValue::Float(x.exp().clamp(*low, *high))
            } else {
                ParameterValue::Float(rng.gen_range(*low..=*high))
            }
        }
        Domain::FixedChoice { choices } => choices[rng.gen_range(0..choices.len())].clone(),
    }
}

/// Independent uniform sampling.
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, _name: &str, domain: &Domain, _history: &[Trial], _direction: Direction) -> ParameterValue {
        sample_uniform(&mut self.rng, domain)
    }
}

/// Tree-structured Parzen estimator, one parameter at a time.
///
/// After `n_startup_trials` completed trials, the completed history is split
/// into the best `gamma` fraction and the rest. Candidates are drawn around the
/// good observations and the one maximising `l(x) / g(x)` is returned, where
/// `l` and `g` are Parzen densities over the good and bad observations.
pub struct TpeSampler {
    rng: StdRng,
    pub n_startup_trials: usize,
    pub n_ei_candidates: usize,
    pub gamma: f64,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            n_startup_trials: 10,
            n_ei_candidates: 24,
            gamma: 0.25,
        }
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    fn standard_normal(&mut self) -> f64 {
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Completed observations of `name`, ordered best first.
    fn observations(name: &str, history: &[Trial], direction: Direction) -> Vec<(ParameterValue, f64)> {
        let mut obs: Vec<(ParameterValue, f64)> = history
            .iter()
            .filter(|t| t.status == TrialStatus::Complete)
            .filter_map(|t| match (t.params.get(name), t.value) {
                (Some(p), Some(v)) if v.is_finite() => Some((p.clone(), v)),
                _ => None,
            })
            .collect();
        obs.sort_by(|a, b| match direction {
            Direction::Maximize => b.1.total_cmp(&a.1),
            Direction::Minimize => a.1.total_cmp(&b.1),
        });
        obs
    }

    fn split_point(&self, n: usize) -> usize {
        ((self.gamma * n as f64).ceil() as usize).clamp(1, n.saturating_sub(1).max(1))
    }

    fn sample_numeric(
        &mut self,
        domain: &Domain,
        obs: &[(ParameterValue, f64)],
    ) -> Option<ParameterValue> {
        let (low, high, log) = match domain {
            Domain::IntRange { low, high } => (*low as f64 - 0.5, *high as f64 + 0.5, false),
            Domain::FloatRange { low, high, log } => (*low, *high, *log),
            Domain::FixedChoice { .. } => return None,
        };
        let to_internal = |x: f64| if log { x.ln() } else { x };
        let (lo, hi) = (to_internal(low), to_internal(high));
        if hi <= lo {
            return None;
        }

        let xs: Vec<f64> = obs
            .iter()
            .filter_map(|(p, _)| p.as_float())
            .map(|x| to_internal(x.clamp(low, high)))
            .collect();
        if xs.len() < 2 {
            return None;
        }
        let n_good = self.split_point(xs.len());
        let (good, bad) = xs.split_at(n_good);

        let good_bw = bandwidth(lo, hi, good.len());
        let bad_bw = bandwidth(lo, hi, bad.len());

        let mut best: Option<(f64, f64)> = None;
        for _ in 0..self.n_ei_candidates {
            let center = good[self.rng.gen_range(0..good.len())];
            let candidate = (center + good_bw * self.standard_normal()).clamp(lo, hi);
            let ratio = parzen_log_density(candidate, good, good_bw, lo, hi)
                - parzen_log_density(candidate, bad, bad_bw, lo, hi);
            if best.map_or(true, |(_, r)| ratio > r) {
                best = Some((candidate, ratio));
            }
        }
        let (x, _) = best?;
        let x = if log { x.exp() } else { x };
        Some(match domain {
            Domain::IntRange { low, high } => ParameterValue::Int((x.round() as i64).clamp(*low, *high)),
            Domain::FloatRange { low, high, .. } => ParameterValue::Float(x.clamp(*low, *high)),
            Domain::FixedChoice { .. } => return None,
        })
    }

    fn sample_categorical(
        &mut self,
        choices: &[ParameterValue],
        obs: &[(ParameterValue, f64)],
    ) -> ParameterValue {
        if choices.len() == 1 {
            return choices[0].clone();
        }
        let n_good = self.split_point(obs.len());
        let (good, bad) = obs.split_at(n_good);
        let k = choices.len() as f64;
        let weight = |set: &[(ParameterValue, f64)], c: &ParameterValue| {
            (set.iter().filter(|(p, _)| p == c).count() as f64 + 1.0) / (set.len() as f64 + k)
        };
        let mut best_idx = self.rng.gen_range(0..choices.len());
        let mut best_ratio = f64::NEG_INFINITY;
        for (i, c) in choices.iter().enumerate() {
            let ratio = weight(good, c) / weight(bad, c);
            if ratio > best_ratio {
                best_ratio = ratio;
                best_idx = i;
            }
        }
        choices[best_idx].clone()
    }
}

fn bandwidth(lo: f64, hi: f64, n: usize) -> f64 {
    let range = hi - lo;
    (range * 0.5 / (n as f64 + 1.0).sqrt()).max(range * 0.01)
}

/// Log-density of a Gaussian mixture over `points` plus a uniform prior
/// component on `[lo, hi]`.
fn parzen_log_density(x: f64, points: &[f64], bw: f64, lo: f64, hi: f64) -> f64 {
    let prior = 1.0 / (hi - lo);
    let norm = 1.0 / (bw * (2.0 * PI).sqrt());
    let kernels: f64 = points
        .iter()
        .map(|p| norm * (-0.5 * ((x - p) / bw).powi(2)).exp())
        .sum();
    ((prior + kernels) / (points.len() as f64 + 1.0)).max(f64::MIN_POSITIVE).ln()
}

impl Sampler for TpeSampler {
    fn sample(
        &mut self,
        name: &str,
        domain: &Domain,
        history: &[Trial],
        direction: Direction,
    ) -> ParameterValue {
        let obs = Self::observations(name, history, direction);
        if obs.len() < self.n_startup_trials.max(2) {
            return sample_uniform(&mut self.rng, domain);
        }
        match domain {
            Domain::FixedChoice { choices } => self.sample_categorical(choices, &obs),
            _ => match self.sample_numeric(domain, &obs) {
                Some(v) => v,
                None => sample_uniform(&mut self.rng, domain),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_space::ModelConfiguration;
    use chrono::Utc;

    fn completed(id: u64, x: f64, value: f64) -> Trial {
        let mut trial = Trial::running(id, Utc::now());
        trial.params = ModelConfiguration::new().with("x", x);
        trial.status = TrialStatus::Complete;
        trial.value = Some(value);
        trial
    }

    #[test]
    fn test_random_sampler_stays_in_domain() {
        let mut sampler = RandomSampler::new(3);
        let domains = [
            Domain::int(1, 64),
            Domain::float(0.6, 1.0),
            Domain::log_float(1e-4, 1e-2),
            Domain::choice(vec!["a".into(), "b".into()]),
            Domain::int(7, 7),
        ];
        for domain in &domains {
            for _ in 0..200 {
                let v = sampler.sample("p", domain, &[], Direction::Maximize);
                assert!(domain.contains(&v), "{v} outside {domain:?}");
            }
        }
    }

    #[test]
    fn test_random_sampler_is_seeded() {
        let draw = |seed| {
            let mut s = RandomSampler::new(seed);
            (0..10)
                .map(|_| s.sample("p", &Domain::int(0, 1000), &[], Direction::Maximize))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
        assert_ne!(draw(11), draw(12));
    }

    #[test]
    fn test_tpe_concentrates_near_good_region() {
        // objective peaks at x = 0.8
        let history: Vec<Trial> = (0..40)
            .map(|i| {
                let x = i as f64 / 40.0;
                completed(i, x, -(x - 0.8).powi(2))
            })
            .collect();
        let mut sampler = TpeSampler::new(5);
        let domain = Domain::float(0.0, 1.0);
        let draws: Vec<f64> = (0..50)
            .map(|_| {
                sampler
                    .sample("x", &domain, &history, Direction::Maximize)
                    .as_float()
                    .unwrap()
            })
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 0.8).abs() < 0.15, "mean {mean}");
        assert!(draws.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_tpe_respects_direction() {
        let history: Vec<Trial> = (0..40)
            .map(|i| {
                let x = i as f64 / 40.0;
                completed(i, x, x)
            })
            .collect();
        let mut sampler = TpeSampler::new(9);
        let domain = Domain::float(0.0, 1.0);
        let mean = |s: &mut TpeSampler, d| {
            (0..50)
                .map(|_| s.sample("x", &domain, &history, d).as_float().unwrap())
                .sum::<f64>()
                / 50.0
        };
        let up = mean(&mut sampler, Direction::Maximize);
        let down = mean(&mut sampler, Direction::Minimize);
        assert!(up > 0.6, "maximize mean {up}");
        assert!(down < 0.4, "minimize mean {down}");
    }

    #[test]
    fn test_tpe_startup_is_uniform_and_int_domain_respected() {
        let mut sampler = TpeSampler::new(1).with_startup_trials(5);
        let history: Vec<Trial> = (0..3).map(|i| completed(i, 10.0, 1.0)).collect();
        for _ in 0..50 {
            let v = sampler.sample("x", &Domain::int(1, 64), &history, Direction::Maximize);
            assert!(Domain::int(1, 64).contains(&v));
        }
    }

    #[test]
    fn test_tpe_ignores_history_of_another_type() {
        // a journal written by a space where `x` was a string
        let history: Vec<Trial> = (0..12)
            .map(|i| {
                let mut trial = completed(i, 0.0, i as f64);
                trial.params = ModelConfiguration::new().with("x", "binary");
                trial
            })
            .collect();
        let mut sampler = TpeSampler::new(4);
        for _ in 0..20 {
            let v = sampler.sample("x", &Domain::int(1, 5), &history, Direction::Maximize);
            assert!(Domain::int(1, 5).contains(&v));
        }
        let v = sampler.sample("x", &Domain::float(0.1, 0.2), &history, Direction::Minimize);
        assert!(Domain::float(0.1, 0.2).contains(&v));
    }
}
