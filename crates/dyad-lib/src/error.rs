use crate::table::IndexUnit;
use thiserror::Error;

/// Failures that abort processing of a whole dyad.
#[derive(Debug, Error)]
pub enum DyadError {
    #[error("error parsing file {file}: {reason} (expected e.g. B01_W1_mc.txt or B01_W1_event.txt)")]
    FilenamePattern { file: String, reason: String },
    #[error("{field} does not match between {ecg} and {events}: {left} vs {right}")]
    DyadMismatch {
        field: &'static str,
        ecg: String,
        events: String,
        left: String,
        right: String,
    },
    #[error("column '{column}' is missing from {table}")]
    MissingColumn { column: String, table: String },
    #[error("column '{column}' holds non-numeric value '{value}'")]
    ColumnType { column: String, value: String },
    #[error("found {matches} rows for event '{event}'; exactly one is required")]
    AmbiguousOrMissingEvent { event: String, matches: usize },
    #[error("cannot merge a table indexed in {left} with one indexed in {right}")]
    IndexUnitMismatch { left: IndexUnit, right: IndexUnit },
    #[error("index of {table} is not strictly increasing at row {row}")]
    NonMonotonicIndex { table: String, row: usize },
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("override for subject {subject_id} names unknown segment '{segment}'")]
    UnknownOverride { subject_id: u32, segment: String },
}

/// Failures of the signal-analysis capability. Inside the windowed engine these are
/// absorbed per window; during preprocessing they are fatal for the dyad.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("found {found} R-peaks, at least {required} are required")]
    InsufficientBeats { found: usize, required: usize },
    #[error("signal is empty")]
    EmptySignal,
    #[error("numerical failure: {0}")]
    Numerical(String),
}
