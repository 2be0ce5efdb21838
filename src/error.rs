use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the report pipeline.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid report payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Unknown education level code: {0}")]
    UnknownLevel(String),

    /// The historical store handed over a day mapping that is not the
    /// documented nested structure.
    #[error("Malformed day mapping for student {student_id} (month {month}): {reason}")]
    MalformedDayMapping {
        student_id: String,
        month: u32,
        reason: String,
    },

    #[error("Failed to read roster file {path}: {source}")]
    Roster {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Key-value store unavailable: {0}")]
    Store(String),

    #[error("Failed to write report artifact {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
