//! Study persistence.
//!
//! `JournalStorage` keeps one append-only JSON-lines file per study. The
//! first line names the study and its direction; every later line is a trial
//! record. A trial is written when it starts and again when it finishes, and
//! the last record for an id wins on load.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StorageError;
use crate::study::{Direction, Trial};

/// A study as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStudy {
    pub name: String,
    pub direction: Direction,
    /// Trials ordered by id.
    pub trials: Vec<Trial>,
}

/// Backend addressed by study name.
pub trait StudyStorage {
    fn create_study(&mut self, name: &str, direction: Direction) -> Result<StoredStudy, StorageError>;

    /// `None` when no study of that name exists.
    fn load_study(&self, name: &str) -> Result<Option<StoredStudy>, StorageError>;

    fn append_trial(&mut self, name: &str, trial: &Trial) -> Result<(), StorageError>;

    /// Load the study, or create it when missing.
    ///
    /// An existing study keeps its stored direction; asking for the other
    /// direction is an error.
    fn load_or_create(&mut self, name: &str, direction: Direction) -> Result<StoredStudy, StorageError> {
        match self.load_study(name)? {
            Some(study) if study.direction != direction => Err(StorageError::DirectionMismatch {
                name: name.to_string(),
                stored: study.direction.to_string(),
                requested: direction.to_string(),
            }),
            Some(study) => Ok(study),
            None => self.create_study(name, direction),
        }
    }
}

/// Collapse a record stream into one trial per id, last record winning.
fn latest_per_id(records: impl IntoIterator<Item = Trial>) -> Vec<Trial> {
    let mut by_id: FxHashMap<u64, Trial> = FxHashMap::default();
    for trial in records {
        by_id.insert(trial.id, trial);
    }
    let mut trials: Vec<Trial> = by_id.into_values().collect();
    trials.sort_by_key(|t| t.id);
    trials
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    Study {
        name: String,
        direction: Direction,
        created_at: DateTime<Utc>,
    },
    Trial(Trial),
}

/// JSON-lines journal, one file per study under `dir`.
#[derive(Debug, Clone)]
pub struct JournalStorage {
    dir: PathBuf,
}

impl JournalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Journal file of study `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    fn append_record(&self, path: &Path, record: &JournalRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(())
    }
}

impl StudyStorage for JournalStorage {
    fn create_study(&mut self, name: &str, direction: Direction) -> Result<StoredStudy, StorageError> {
        let path = self.path_for(name);
        if path.exists() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        self.append_record(
            &path,
            &JournalRecord::Study {
                name: name.to_string(),
                direction,
                created_at: Utc::now(),
            },
        )?;
        debug!(study = name, path = %path.display(), "created study journal");
        Ok(StoredStudy {
            name: name.to_string(),
            direction,
            trials: Vec::new(),
        })
    }

    fn load_study(&self, name: &str) -> Result<Option<StoredStudy>, StorageError> {
        let path = self.path_for(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        let mut header: Option<(String, Direction)> = None;
        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord =
                serde_json::from_str(&line).map_err(|source| StorageError::Corrupt {
                    path: path.clone(),
                    line: i + 1,
                    source,
                })?;
            match record {
                JournalRecord::Study { name, direction, .. } => header = Some((name, direction)),
                JournalRecord::Trial(trial) => records.push(trial),
            }
        }

        let (stored_name, direction) = header.ok_or_else(|| StorageError::UnknownStudy(name.to_string()))?;
        Ok(Some(StoredStudy {
            name: stored_name,
            direction,
            trials: latest_per_id(records),
        }))
    }

    fn append_trial(&mut self, name: &str, trial: &Trial) -> Result<(), StorageError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(StorageError::UnknownStudy(name.to_string()));
        }
        self.append_record(&path, &JournalRecord::Trial(trial.clone()))
    }
}

/// Volatile storage for tests and throwaway searches.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    studies: FxHashMap<String, (Direction, Vec<Trial>)>,
}

impl StudyStorage for InMemoryStorage {
    fn create_study(&mut self, name: &str, direction: Direction) -> Result<StoredStudy, StorageError> {
        if self.studies.contains_key(name) {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        self.studies.insert(name.to_string(), (direction, Vec::new()));
        Ok(StoredStudy {
            name: name.to_string(),
            direction,
            trials: Vec::new(),
        })
    }

    fn load_study(&self, name: &str) -> Result<Option<StoredStudy>, StorageError> {
        Ok(self.studies.get(name).map(|(direction, records)| StoredStudy {
            name: name.to_string(),
            direction: *direction,
            trials: latest_per_id(records.iter().cloned()),
        }))
    }

    fn append_trial(&mut self, name: &str, trial: &Trial) -> Result<(), StorageError> {
        let (_, records) = self
            .studies
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownStudy(name.to_string()))?;
        records.push(trial.clone());
        Ok(())
    }
}
