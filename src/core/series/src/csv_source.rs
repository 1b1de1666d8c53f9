use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::bundle::SeriesBundle;
use crate::error::SeriesError;
use crate::provider::{
    calendar_covariates, split_bundle, to_direction_labels, DataMode, DataProvider, SplitLengths,
};
use crate::timeseries::{TimeSeries, Timestamp};

/// Column roles in a CSV data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvLayout {
    /// Column holding the timestamp
    #[serde(default = "default_date_column")]
    pub date_column: String,
    /// Target columns (one component each)
    pub target_columns: Vec<String>,
    /// Past covariates; the raw targets are used when empty
    #[serde(default)]
    pub past_covariate_columns: Vec<String>,
    /// Future covariates; calendar features are used when empty
    #[serde(default)]
    pub future_covariate_columns: Vec<String>,
}

fn default_date_column() -> String {
    "date".to_string()
}

/// Data provider reading a single wide CSV file.
#[derive(Debug, Clone)]
pub struct CsvDataProvider {
    pub path: PathBuf,
    pub layout: CsvLayout,
    pub lengths: SplitLengths,
}

/// Raw columns read from the file, before any split.
struct RawTable {
    index: Vec<Timestamp>,
    columns: Vec<(String, Vec<f64>)>,
}

impl RawTable {
    fn series(&self, names: &[String]) -> Result<TimeSeries, SeriesError> {
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let (_, values) = self
                .columns
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| SeriesError::MissingColumn(name.clone()))?;
            cols.push(values.clone());
        }
        TimeSeries::from_columns(self.index.clone(), names.to_vec(), &cols)
    }
}

impl CsvDataProvider {
    pub fn new(path: impl Into<PathBuf>, layout: CsvLayout, lengths: SplitLengths) -> Self {
        Self {
            path: path.into(),
            layout,
            lengths,
        }
    }

    fn read_table(&self) -> Result<RawTable, SeriesError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();

        let date_pos = headers
            .iter()
            .position(|h| h == self.layout.date_column.as_str())
            .ok_or_else(|| SeriesError::MissingColumn(self.layout.date_column.clone()))?;

        let wanted: Vec<String> = self
            .layout
            .target_columns
            .iter()
            .chain(&self.layout.past_covariate_columns)
            .chain(&self.layout.future_covariate_columns)
            .cloned()
            .collect();
        let mut positions = Vec::with_capacity(wanted.len());
        for name in &wanted {
            let pos = headers
                .iter()
                .position(|h| h == name.as_str())
                .ok_or_else(|| SeriesError::MissingColumn(name.clone()))?;
            positions.push(pos);
        }

        let mut index = Vec::new();
        let mut columns: Vec<(String, Vec<f64>)> =
            wanted.iter().map(|n| (n.clone(), Vec::new())).collect();

        for (row_num, record) in reader.records().enumerate() {
            let record = record?;
            let row = row_num + 1;
            let raw_date = record.get(date_pos).unwrap_or_default();
            index.push(parse_timestamp(raw_date).ok_or_else(|| SeriesError::Parse {
                row,
                message: format!("invalid timestamp '{raw_date}'"),
            })?);

            for ((name, column), &pos) in columns.iter_mut().zip(&positions) {
                let field = record.get(pos).unwrap_or_default().trim();
                let value = field.parse::<f64>().map_err(|_| SeriesError::Parse {
                    row,
                    message: format!("invalid number '{field}' in column '{name}'"),
                })?;
                column.push(value);
            }
        }
        debug!(rows = index.len(), file = %self.path.display(), "read data file");
        Ok(RawTable { index, columns })
    }
}

impl DataProvider for CsvDataProvider {
    fn get_series_bundle(&self, mode: DataMode, binary: bool) -> Result<SeriesBundle, SeriesError> {
        let table = self.read_table()?;
        let raw_target = table.series(&self.layout.target_columns)?;

        let past = if self.layout.past_covariate_columns.is_empty() {
            raw_target.clone()
        } else {
            table.series(&self.layout.past_covariate_columns)?
        };
        let future = if self.layout.future_covariate_columns.is_empty() {
            calendar_covariates(&table.index)?
        } else {
            table.series(&self.layout.future_covariate_columns)?
        };

        let target = if binary {
            to_direction_labels(&raw_target)?
        } else {
            raw_target
        };

        let bundle = split_bundle(&target, past, future, &self.lengths, mode)?;
        info!(
            mode = %mode,
            train = bundle.train.len(),
            val = bundle.val.len(),
            test = bundle.test.len(),
            "loaded series bundle from {}",
            self.path.display()
        );
        Ok(bundle)
    }
}

/// Parse the timestamp formats seen in exported market data.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and `YYYYMMDD`.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    ["%Y-%m-%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
