//! Optimization loop: trials, best-trial tracking and the study itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{ConfigurationError, StorageError, TrialError};
use crate::sampler::Sampler;
use crate::search_space::{Domain, ModelConfiguration, ParamSource, ParameterValue};
use crate::storage::StudyStorage;

/// Optimization direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `candidate` is strictly better than `incumbent`.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Maximize => write!(f, "maximize"),
            Direction::Minimize => write!(f, "minimize"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maximize" => Ok(Direction::Maximize),
            "minimize" => Ok(Direction::Minimize),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Running,
    Complete,
    Failed,
}

/// One hyperparameter proposal and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: u64,
    pub params: ModelConfiguration,
    pub value: Option<f64>,
    pub status: TrialStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Side metrics reported by the objective (recall, accuracy, ...).
    #[serde(default)]
    pub user_attrs: BTreeMap<String, f64>,
}

impl Trial {
    pub fn running(id: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            params: ModelConfiguration::new(),
            value: None,
            status: TrialStatus::Running,
            error: None,
            started_at,
            finished_at: None,
            user_attrs: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TrialStatus::Complete
    }
}

/// Best completed trial so far. Handed read-only to the objective.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestTracker {
    trial_id: Option<u64>,
    value: Option<f64>,
    params: Option<ModelConfiguration>,
}

impl BestTracker {
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn params(&self) -> Option<&ModelConfiguration> {
        self.params.as_ref()
    }

    pub fn trial_id(&self) -> Option<u64> {
        self.trial_id
    }

    /// Adopt `trial` if it completed with a strictly better value.
    pub fn offer(&mut self, trial: &Trial, direction: Direction) -> bool {
        let Some(value) = trial.value.filter(|v| v.is_finite()) else {
            return false;
        };
        if !trial.is_complete() {
            return false;
        }
        let improved = match self.value {
            None => true,
            Some(best) => direction.is_better(value, best),
        };
        if improved {
            self.trial_id = Some(trial.id);
            self.value = Some(value);
            self.params = Some(trial.params.clone());
        }
        improved
    }

    /// Rebuild from a trial history.
    pub fn from_trials(trials: &[Trial], direction: Direction) -> Self {
        let mut best = Self::default();
        for trial in trials {
            best.offer(trial, direction);
        }
        best
    }
}

/// Parameter source for a trial in progress.
///
/// Every value drawn is recorded into the trial's parameters.
pub struct TrialProposal<'a> {
    trial_id: u64,
    sampler: &'a mut dyn Sampler,
    history: &'a [Trial],
    direction: Direction,
    params: ModelConfiguration,
    user_attrs: BTreeMap<String, f64>,
}

impl<'a> TrialProposal<'a> {
    pub fn new(
        trial_id: u64,
        sampler: &'a mut dyn Sampler,
        history: &'a [Trial],
        direction: Direction,
    ) -> Self {
        Self {
            trial_id,
            sampler,
            history,
            direction,
            params: ModelConfiguration::new(),
            user_attrs: BTreeMap::new(),
        }
    }

    pub fn trial_id(&self) -> u64 {
        self.trial_id
    }

    /// Parameters drawn so far.
    pub fn params(&self) -> &ModelConfiguration {
        &self.params
    }

    /// Attach a side metric to the trial.
    pub fn set_user_attr(&mut self, name: &str, value: f64) {
        self.user_attrs.insert(name.to_string(), value);
    }

    fn finish(self) -> (ModelConfiguration, BTreeMap<String, f64>) {
        (self.params, self.user_attrs)
    }
}

impl ParamSource for TrialProposal<'_> {
    fn propose(&mut self, name: &str, domain: &Domain) -> Result<ParameterValue, ConfigurationError> {
        domain.validate(name)?;
        // a parameter asked twice in one trial keeps its first draw
        if let Some(existing) = self.params.get(name) {
            if domain.contains(existing) {
                return Ok(existing.clone());
            }
        }
        let value = self.sampler.sample(name, domain, self.history, self.direction);
        self.params.insert(name, value.clone());
        Ok(value)
    }
}

/// Outcome of one `optimize` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub best_trial: Option<u64>,
    pub best_value: Option<f64>,
    pub best_params: Option<ModelConfiguration>,
}

/// A named, persisted search.
pub struct Study {
    name: String,
    direction: Direction,
    trials: Vec<Trial>,
    best: BestTracker,
    next_id: u64,
    storage: Box<dyn StudyStorage>,
    sampler: Box<dyn Sampler>,
}

impl Study {
    /// Open the study `name`, creating it when the storage has none.
    ///
    /// Trials left `running` by an interrupted process are marked failed and
    /// journaled as such; ids continue after the largest stored id.
    pub fn load_or_create(
        name: &str,
        direction: Direction,
        mut storage: Box<dyn StudyStorage>,
        sampler: Box<dyn Sampler>,
    ) -> Result<Self, StorageError> {
        let stored = storage.load_or_create(name, direction)?;
        let mut trials = stored.trials;

        for trial in trials.iter_mut().filter(|t| t.status == TrialStatus::Running) {
            warn!(trial = trial.id, study = name, "marking interrupted trial as failed");
            trial.status = TrialStatus::Failed;
            trial.error = Some("interrupted before completion".to_string());
            trial.finished_at = Some(Utc::now());
            storage.append_trial(name, trial)?;
        }

        let next_id = trials.iter().map(|t| t.id + 1).max().unwrap_or(0);
        let best = BestTracker::from_trials(&trials, stored.direction);
        if !trials.is_empty() {
            info!(
                study = name,
                trials = trials.len(),
                best = ?best.value(),
                "resumed study"
            );
        }
        Ok(Self {
            name: name.to_string(),
            direction: stored.direction,
            trials,
            best,
            next_id,
            storage,
            sampler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn best(&self) -> &BestTracker {
        &self.best
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        let id = self.best.trial_id()?;
        self.trials.iter().find(|t| t.id == id)
    }

    /// Run `n_trials` attempts of `objective`.
    ///
    /// Trial errors and non-finite scores mark the trial failed and the loop
    /// moves on; only storage errors abort. Failed trials count toward
    /// `n_trials`.
    pub fn optimize<F>(&mut self, n_trials: usize, mut objective: F) -> Result<OptimizationSummary, StorageError>
    where
        F: FnMut(&mut TrialProposal<'_>, &BestTracker) -> Result<f64, TrialError>,
    {
        let mut completed = 0;
        let mut failed = 0;

        for _ in 0..n_trials {
            let id = self.next_id;
            self.next_id += 1;

            let mut trial = Trial::running(id, Utc::now());
            self.storage.append_trial(&self.name, &trial)?;

            let mut proposal = TrialProposal::new(id, self.sampler.as_mut(), &self.trials, self.direction);
            let outcome = objective(&mut proposal, &self.best);
            let (params, user_attrs) = proposal.finish();

            trial.params = params;
            trial.user_attrs = user_attrs;
            trial.finished_at = Some(Utc::now());

            match outcome.and_then(|v| if v.is_finite() { Ok(v) } else { Err(TrialError::NonFinite(v)) }) {
                Ok(value) => {
                    trial.status = TrialStatus::Complete;
                    trial.value = Some(value);
                    completed += 1;
                }
                Err(err) => {
                    warn!(trial = id, error = %err, "trial failed");
                    trial.status = TrialStatus::Failed;
                    trial.error = Some(err.to_string());
                    failed += 1;
                }
            }

            self.storage.append_trial(&self.name, &trial)?;
            let improved = self.best.offer(&trial, self.direction);
            if let Some(value) = trial.value {
                info!(
                    "Trial {} finished with value {:.4} and parameters {}. Best is trial {} with value {:.4}.",
                    id,
                    value,
                    trial.params,
                    self.best.trial_id().unwrap_or(id),
                    self.best.value().unwrap_or(value),
                );
                if improved {
                    info!(trial = id, value, "new best trial");
                }
            }
            self.trials.push(trial);
        }

        match (self.best.trial_id(), self.best.value(), self.best.params()) {
            (Some(id), Some(value), Some(params)) => {
                info!("Best trial {id}: value {value:.4}, parameters {params}")
            }
            _ => warn!(study = %self.name, "no trial completed successfully"),
        }

        Ok(OptimizationSummary {
            attempted: completed + failed,
            completed,
            failed,
            best_trial: self.best.trial_id(),
            best_value: self.best.value(),
            best_params: self.best.params().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::RandomSampler;
    use crate::storage::InMemoryStorage;

    fn study() -> Study {
        Study::load_or_create(
            "unit",
            Direction::Maximize,
            Box::new(InMemoryStorage::default()),
            Box::new(RandomSampler::new(0)),
        )
        .unwrap()
    }

    #[test]
    fn test_best_updates_only_on_strict_improvement() {
        let mut study = study();
        let scores = [0.5, 0.7, 0.7, 0.6];
        let mut i = 0;
        let summary = study
            .optimize(4, |p, _| {
                p.propose_int("x", 0, 10)?;
                let s = scores[i];
                i += 1;
                Ok(s)
            })
            .unwrap();
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.best_value, Some(0.7));
        assert_eq!(summary.best_trial, Some(1));
    }

    #[test]
    fn test_failed_and_non_finite_trials_are_isolated() {
        let mut study = study();
        let mut calls = 0;
        let summary = study
            .optimize(5, |p, _| {
                let x = p.propose_float("x", 0.0, 1.0, false)?;
                calls += 1;
                match calls {
                    2 => Ok(f64::NAN),
                    3 => Err(TrialError::Other("boom".into())),
                    _ => Ok(x),
                }
            })
            .unwrap();
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 3);
        assert_eq!(study.trials()[2].error.as_deref(), Some("boom"));
        assert!(study.trials()[1].value.is_none());
    }

    #[test]
    fn test_objective_sees_best_tracker() {
        let mut study = study();
        let mut seen = Vec::new();
        study
            .optimize(3, |_, best| {
                seen.push(best.value());
                Ok(seen.len() as f64)
            })
            .unwrap();
        assert_eq!(seen, vec![None, Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_minimize_direction() {
        let mut study = Study::load_or_create(
            "min",
            Direction::Minimize,
            Box::new(InMemoryStorage::default()),
            Box::new(RandomSampler::new(0)),
        )
        .unwrap();
        let values = [3.0, 1.0, 2.0];
        let mut i = 0;
        let summary = study
            .optimize(3, |_, _| {
                i += 1;
                Ok(values[i - 1])
            })
            .unwrap();
        assert_eq!(summary.best_value, Some(1.0));
    }

    #[test]
    fn test_configuration_error_fails_trial() {
        let mut study = study();
        let summary = study
            .optimize(1, |p, _| {
                p.propose_int("x", 10, 1)?;
                Ok(1.0)
            })
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert!(study.trials()[0].error.as_deref().unwrap().contains("invalid bounds"));
    }
}
