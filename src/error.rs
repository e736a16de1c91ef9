use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures talking to the export service.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Export API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed export response: {0}")]
    InvalidResponse(String),
}

impl ExportError {
    /// Response payload, when the server sent one.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ExportError::Api { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Timed out after {queries} status queries ({elapsed:?} elapsed)")]
    TimedOut { elapsed: Duration, queries: u32 },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download returned HTTP {status}")]
    Http { status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive contains no entries")]
    Empty,

    #[error("Archive entry {0:?} was not extracted")]
    MissingEntry(String),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Sheets API error: {0}")]
    Api(String),

    #[error("Sheets API response is missing {0}")]
    MissingReply(&'static str),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Source file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Failed to read delimited file: {0}")]
    Read(#[from] csv::Error),

    #[error("Reader task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Sheets(#[from] SheetsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("An existing sheet name is required unless writing to a new sheet")]
    MissingSheetName,
}
