//! Transfer tasks: what to move and where it lands.
//!
//! A [`TransferTask`] names one trip-data file, either by (dataset kind, period, format)
//! or by an explicit file name. Every other name the pipeline needs (remote object key,
//! local staging path, download URL, warehouse table names) is derived from it, and the
//! derivation is pure: the same task always resolves to the same strings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Earliest year published by the TLC trip record mirrors.
pub const MIN_YEAR: u16 = 2009;
pub const MAX_YEAR: u16 = 2100;

/// NYC TLC trip record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Yellow,
    Green,
    Fhv,
    Fhvhv,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Yellow => "yellow",
            DatasetKind::Green => "green",
            DatasetKind::Fhv => "fhv",
            DatasetKind::Fhvhv => "fhvhv",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(DatasetKind::Yellow),
            "green" => Ok(DatasetKind::Green),
            "fhv" => Ok(DatasetKind::Fhv),
            "fhvhv" => Ok(DatasetKind::Fhvhv),
            other => Err(TaskError::UnknownKind(other.to_string())),
        }
    }
}

/// A calendar month of trip data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: u16,
    month: u8,
}

impl Period {
    pub fn new(year: u16, month: u8) -> Result<Self, TaskError> {
        if !(1..=12).contains(&month) {
            return Err(TaskError::InvalidMonth(month));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(TaskError::InvalidYear(year));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// All periods of `year` from `from_month` to `to_month`, inclusive.
    pub fn range(year: u16, from_month: u8, to_month: u8) -> Result<Vec<Period>, TaskError> {
        if from_month > to_month {
            return Err(TaskError::EmptyRange {
                from: from_month,
                to: to_month,
            });
        }
        (from_month..=to_month)
            .map(|month| Period::new(year, month))
            .collect()
    }
}

/// Renders as `YYYY-MM`.
impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// On-disk/remote encoding of a trip file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    CsvGz,
    Parquet,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::CsvGz => "csv.gz",
            FileFormat::Parquet => "parquet",
        }
    }
}

/// One unit of transfer work. Built per invocation, used once, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransferTask {
    Period {
        kind: DatasetKind,
        period: Period,
        format: FileFormat,
    },
    Named { file_name: String },
}

impl TransferTask {
    pub fn for_period(kind: DatasetKind, period: Period, format: FileFormat) -> Self {
        TransferTask::Period {
            kind,
            period,
            format,
        }
    }

    /// A task for an arbitrary file already sitting (or downloadable) under its own name.
    pub fn named(file_name: impl Into<String>) -> Result<Self, TaskError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(TaskError::EmptyFileName);
        }
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(TaskError::PathInFileName(file_name));
        }
        Ok(TransferTask::Named { file_name })
    }

    /// Canonical remote object key, e.g. `green_tripdata_2024-03.csv.gz`.
    pub fn remote_key(&self) -> String {
        match self {
            TransferTask::Period {
                kind,
                period,
                format,
            } => format!("{kind}_tripdata_{period}.{}", format.extension()),
            TransferTask::Named { file_name } => file_name.clone(),
        }
    }

    pub fn local_path(&self, staging_dir: &Path) -> PathBuf {
        staging_dir.join(self.remote_key())
    }

    pub fn kind(&self) -> Option<DatasetKind> {
        match self {
            TransferTask::Period { kind, .. } => Some(*kind),
            TransferTask::Named { .. } => None,
        }
    }

    pub fn period(&self) -> Option<Period> {
        match self {
            TransferTask::Period { period, .. } => Some(*period),
            TransferTask::Named { .. } => None,
        }
    }
}

impl fmt::Display for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote_key())
    }
}
