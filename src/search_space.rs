//! Parameter domains and the sources that resolve them into a
//! [`ModelConfiguration`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigurationError;

/// A single resolved hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            ParameterValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{v}"),
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

/// The set of values a parameter may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    /// Inclusive integer range.
    IntRange { low: i64, high: i64 },
    /// Inclusive float range, sampled uniformly in log space when `log` is set.
    FloatRange { low: f64, high: f64, log: bool },
    /// One of the listed values. A single value is a constant.
    FixedChoice { choices: Vec<ParameterValue> },
}

impl Domain {
    pub fn int(low: i64, high: i64) -> Self {
        Domain::IntRange { low, high }
    }

    pub fn float(low: f64, high: f64) -> Self {
        Domain::FloatRange { low, high, log: false }
    }

    pub fn log_float(low: f64, high: f64) -> Self {
        Domain::FloatRange { low, high, log: true }
    }

    pub fn fixed(value: impl Into<ParameterValue>) -> Self {
        Domain::FixedChoice {
            choices: vec![value.into()],
        }
    }

    pub fn choice(choices: Vec<ParameterValue>) -> Self {
        Domain::FixedChoice { choices }
    }

    /// Integer range whose upper bound is clamped to `cap`.
    ///
    /// Fails when the cap falls below `low`; the range is never widened or
    /// swapped to make room.
    pub fn int_capped(name: &str, low: i64, high: i64, cap: i64) -> Result<Self, ConfigurationError> {
        if cap < low {
            return Err(ConfigurationError::CapBelowLower {
                name: name.to_string(),
                low,
                cap,
            });
        }
        let domain = Domain::int(low, high.min(cap));
        domain.validate(name)?;
        Ok(domain)
    }

    /// Reject empty or malformed domains.
    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidBounds {
            name: name.to_string(),
            reason,
        };
        match self {
            Domain::IntRange { low, high } => {
                if high < low {
                    return Err(invalid(format!("high {high} < low {low}")));
                }
            }
            Domain::FloatRange { low, high, log } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid(format!("non-finite bounds [{low}, {high}]")));
                }
                if high < low {
                    return Err(invalid(format!("high {high} < low {low}")));
                }
                if *log && *low <= 0.0 {
                    return Err(invalid(format!("log range needs positive bounds, low is {low}")));
                }
            }
            Domain::FixedChoice { choices } => {
                if choices.is_empty() {
                    return Err(invalid("empty choice list".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Membership test. Float ranges accept integer values.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Domain::IntRange { low, high }, ParameterValue::Int(v)) => low <= v && v <= high,
            (Domain::FloatRange { low, high, .. }, v) => match v.as_float() {
                Some(x) => *low <= x && x <= *high,
                None => false,
            },
            (Domain::FixedChoice { choices }, v) => choices.contains(v),
            _ => false,
        }
    }
}

/// Source of parameter values for a search space.
///
/// The space definition asks for each parameter by name and domain; a study
/// trial draws from its sampler, a stored configuration replays its values.
pub trait ParamSource {
    /// Resolve `name` over `domain`. Implementations validate the domain
    /// before drawing.
    fn propose(&mut self, name: &str, domain: &Domain) -> Result<ParameterValue, ConfigurationError>;

    fn propose_int(&mut self, name: &str, low: i64, high: i64) -> Result<i64, ConfigurationError> {
        self.propose_in(name, &Domain::int(low, high))
    }

    fn propose_float(
        &mut self,
        name: &str,
        low: f64,
        high: f64,
        log: bool,
    ) -> Result<f64, ConfigurationError> {
        let value = self.propose(name, &Domain::FloatRange { low, high, log })?;
        value.as_float().ok_or_else(|| ConfigurationError::TypeMismatch {
            name: name.to_string(),
            expected: "a float",
        })
    }

    fn propose_fixed(
        &mut self,
        name: &str,
        value: ParameterValue,
    ) -> Result<ParameterValue, ConfigurationError> {
        self.propose(name, &Domain::fixed(value))
    }

    /// Integer proposal over an arbitrary (e.g. capped) integer domain.
    fn propose_in(&mut self, name: &str, domain: &Domain) -> Result<i64, ConfigurationError> {
        let value = self.propose(name, domain)?;
        value.as_int().ok_or_else(|| ConfigurationError::TypeMismatch {
            name: name.to_string(),
            expected: "an integer",
        })
    }
}

/// Fully resolved hyperparameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelConfiguration {
    values: BTreeMap<String, ParameterValue>,
}

impl ModelConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParameterValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: &str, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    fn require(&self, name: &str) -> Result<&ParameterValue, ConfigurationError> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingParameter(name.to_string()))
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ConfigurationError> {
        self.require(name)?
            .as_int()
            .ok_or_else(|| ConfigurationError::TypeMismatch {
                name: name.to_string(),
                expected: "an integer",
            })
    }

    /// Integer parameter that must be at least `min`.
    pub fn get_usize(&self, name: &str, min: usize) -> Result<usize, ConfigurationError> {
        let v = self.get_int(name)?;
        if v < min as i64 {
            return Err(ConfigurationError::OutOfDomain {
                name: name.to_string(),
                value: v.to_string(),
            });
        }
        Ok(v as usize)
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ConfigurationError> {
        self.require(name)?
            .as_float()
            .ok_or_else(|| ConfigurationError::TypeMismatch {
                name: name.to_string(),
                expected: "a float",
            })
    }

    pub fn get_text(&self, name: &str) -> Result<&str, ConfigurationError> {
        self.require(name)?
            .as_text()
            .ok_or_else(|| ConfigurationError::TypeMismatch {
                name: name.to_string(),
                expected: "a string",
            })
    }

    /// Optional float with a default.
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64, ConfigurationError> {
        if self.contains(name) {
            self.get_float(name)
        } else {
            Ok(default)
        }
    }

    pub fn text_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, ConfigurationError> {
        if self.contains(name) {
            self.get_text(name)
        } else {
            Ok(default)
        }
    }

    /// Optional integer with a default.
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize, ConfigurationError> {
        if self.contains(name) {
            self.get_usize(name, 0)
        } else {
            Ok(default)
        }
    }
}

impl fmt::Display for ModelConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, ParameterValue)> for ModelConfiguration {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Replays a stored configuration through a search space.
///
/// Every requested parameter must be present and inside its domain.
#[derive(Debug, Clone)]
pub struct FixedParams {
    values: ModelConfiguration,
}

impl FixedParams {
    pub fn new(values: ModelConfiguration) -> Self {
        Self { values }
    }
}

impl ParamSource for FixedParams {
    fn propose(&mut self, name: &str, domain: &Domain) -> Result<ParameterValue, ConfigurationError> {
        domain.validate(name)?;
        let value = self
            .values
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingParameter(name.to_string()))?;
        if !domain.contains(value) {
            return Err(ConfigurationError::OutOfDomain {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        // JSON files may carry whole numbers for float parameters
        match (domain, value) {
            (Domain::FloatRange { .. }, ParameterValue::Int(v)) => Ok(ParameterValue::Float(*v as f64)),
            _ => Ok(value.clone()),
        }
    }
}
