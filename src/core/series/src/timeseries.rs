use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::SeriesError;

/// Timestamp type used for every time index.
pub type Timestamp = DateTime<Utc>;

/// Multi-component series over a strictly increasing time index.
///
/// Values are stored row-major: row `i` holds the `n_components()` values
/// observed at `time_index()[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    index: Vec<Timestamp>,
    components: Vec<String>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Build a series, validating its shape and index ordering.
    pub fn new(
        index: Vec<Timestamp>,
        components: Vec<String>,
        values: Vec<f64>,
    ) -> Result<Self, SeriesError> {
        if components.is_empty() {
            return Err(SeriesError::NoComponents);
        }
        let expected = index.len() * components.len();
        if values.len() != expected {
            return Err(SeriesError::Shape {
                rows: index.len(),
                components: components.len(),
                expected,
                actual: values.len(),
            });
        }
        for (position, pair) in index.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(SeriesError::NonMonotonic {
                    position: position + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(Self {
            index,
            components,
            values,
        })
    }

    /// Build a single-component series.
    pub fn univariate(
        index: Vec<Timestamp>,
        name: &str,
        values: Vec<f64>,
    ) -> Result<Self, SeriesError> {
        Self::new(index, vec![name.to_string()], values)
    }

    /// Build a series from one column vector per component.
    pub fn from_columns(
        index: Vec<Timestamp>,
        components: Vec<String>,
        columns: &[Vec<f64>],
    ) -> Result<Self, SeriesError> {
        let n_rows = index.len();
        if let Some(bad) = columns.iter().find(|c| c.len() != n_rows) {
            return Err(SeriesError::Shape {
                rows: n_rows,
                components: columns.len(),
                expected: n_rows * columns.len(),
                actual: bad.len() * columns.len(),
            });
        }
        let mut values = Vec::with_capacity(n_rows * columns.len());
        for row in 0..n_rows {
            values.extend(columns.iter().map(|col| col[row]));
        }
        Self::new(index, components, values)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn time_index(&self) -> &[Timestamp] {
        &self.index
    }

    /// Flat row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.index.first().copied()
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.index.last().copied()
    }

    /// Values of row `i`, one per component.
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.components.len();
        &self.values[i * n..(i + 1) * n]
    }

    pub fn value(&self, row: usize, component: usize) -> f64 {
        self.values[row * self.components.len() + component]
    }

    /// Copy out one component as a column vector.
    pub fn column(&self, component: usize) -> Vec<f64> {
        (0..self.len()).map(|i| self.value(i, component)).collect()
    }

    /// Position of `ts` in the index, if present.
    pub fn position_of(&self, ts: Timestamp) -> Option<usize> {
        self.index.binary_search(&ts).ok()
    }

    /// Row values observed at `ts`, if present.
    pub fn row_at(&self, ts: Timestamp) -> Option<&[f64]> {
        self.position_of(ts).map(|i| self.row(i))
    }

    /// First timestamp of `other` missing from this series, if any.
    pub fn first_uncovered(&self, other: &TimeSeries) -> Option<Timestamp> {
        other
            .time_index()
            .iter()
            .copied()
            .find(|ts| self.position_of(*ts).is_none())
    }

    /// True when every timestamp of `other` is present in this series.
    pub fn covers(&self, other: &TimeSeries) -> bool {
        self.first_uncovered(other).is_none()
    }

    /// Sub-series over a positional range.
    pub fn slice(&self, range: Range<usize>) -> TimeSeries {
        let n = self.components.len();
        TimeSeries {
            index: self.index[range.clone()].to_vec(),
            components: self.components.clone(),
            values: self.values[range.start * n..range.end * n].to_vec(),
        }
    }

    /// Last `n` points (the whole series when shorter).
    pub fn tail(&self, n: usize) -> TimeSeries {
        let start = self.len().saturating_sub(n);
        self.slice(start..self.len())
    }

    /// Everything except the last `n` points.
    pub fn drop_last(&self, n: usize) -> TimeSeries {
        let end = self.len().saturating_sub(n);
        self.slice(0..end)
    }

    /// Concatenate `other` after this series.
    ///
    /// Both must share components and `other` must start strictly after this
    /// series ends.
    pub fn append(&self, other: &TimeSeries) -> Result<TimeSeries, SeriesError> {
        if self.components != other.components {
            return Err(SeriesError::Append(format!(
                "component mismatch {:?} vs {:?}",
                self.components, other.components
            )));
        }
        if let (Some(end), Some(start)) = (self.end_time(), other.start_time()) {
            if start <= end {
                return Err(SeriesError::Append(format!(
                    "second series starts at {start}, not after {end}"
                )));
            }
        }
        let mut index = self.index.clone();
        index.extend_from_slice(&other.index);
        let mut values = self.values.clone();
        values.extend_from_slice(&other.values);
        Ok(TimeSeries {
            index,
            components: self.components.clone(),
            values,
        })
    }

    /// Apply `f` to every value.
    pub fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> TimeSeries {
        TimeSeries {
            index: self.index.clone(),
            components: self.components.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Keep only the listed component positions.
    pub fn select(&self, components: &[usize]) -> TimeSeries {
        let mut values = Vec::with_capacity(self.len() * components.len());
        for row in 0..self.len() {
            values.extend(components.iter().map(|&c| self.value(row, c)));
        }
        TimeSeries {
            index: self.index.clone(),
            components: components
                .iter()
                .map(|&c| self.components[c].clone())
                .collect(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn days(n: usize) -> Vec<Timestamp> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_new_rejects_bad_shape() {
        let result = TimeSeries::new(days(3), vec!["a".into()], vec![1.0, 2.0]);
        assert!(matches!(result, Err(SeriesError::Shape { .. })));
    }

    #[test]
    fn test_new_rejects_non_monotonic_index() {
        let mut index = days(3);
        index.swap(1, 2);
        let result = TimeSeries::univariate(index, "a", vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(SeriesError::NonMonotonic { position: 1, .. })));
    }

    #[test]
    fn test_from_columns_is_row_major() {
        let s = TimeSeries::from_columns(
            days(2),
            vec!["a".into(), "b".into()],
            &[vec![1.0, 2.0], vec![10.0, 20.0]],
        )
        .unwrap();
        assert_eq!(s.values(), &[1.0, 10.0, 2.0, 20.0]);
        assert_eq!(s.row(1), &[2.0, 20.0]);
        assert_eq!(s.column(1), vec![10.0, 20.0]);
    }

    #[test]
    fn test_tail_and_drop_last() {
        let s = TimeSeries::univariate(days(5), "a", vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let tail = s.tail(2);
        assert_eq!(tail.values(), &[3.0, 4.0]);
        assert_eq!(tail.time_index(), &s.time_index()[3..]);
        assert_eq!(s.drop_last(2).len(), 3);
        assert_eq!(s.tail(10).len(), 5);
    }

    #[test]
    fn test_position_and_coverage() {
        let full = TimeSeries::univariate(days(5), "a", vec![0.0; 5]).unwrap();
        let part = full.slice(1..4);
        assert_eq!(full.position_of(part.time_index()[0]), Some(1));
        assert!(full.covers(&part));
        assert!(!part.covers(&full));
        assert_eq!(part.first_uncovered(&full), Some(full.time_index()[0]));
    }

    #[test]
    fn test_append_requires_ordering() {
        let full = TimeSeries::univariate(days(4), "a", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let head = full.slice(0..2);
        let rest = full.slice(2..4);
        assert_eq!(head.append(&rest).unwrap(), full);
        assert!(rest.append(&head).is_err());
    }
}
