use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder};
use tracing::debug;

use crate::error::ImportError;

/// One spreadsheet row, one string per field.
pub type SheetRow = Vec<String>;

/// How often the header row is pushed into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEmission {
    /// Once, ahead of the first record.
    Once,
    /// Ahead of every record.
    BeforeEveryRecord,
}

/// Builds the row buffer from a delimited stream whose first line is the header.
///
/// The header is only pushed once a record arrives, so a header-only input yields
/// an empty buffer. Bytes that are not valid UTF-8 become U+FFFD.
pub fn collect_rows<R: Read>(
    reader: R,
    delimiter: u8,
    emission: HeaderEmission,
) -> Result<Vec<SheetRow>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = lossy_row(reader.byte_headers()?);
    let mut rows = Vec::new();
    let mut header_pending = true;

    for result in reader.byte_records() {
        let record = result?;
        if header_pending {
            rows.push(headers.clone());
            header_pending = emission == HeaderEmission::BeforeEveryRecord;
        }
        rows.push(lossy_row(&record));
    }

    debug!("Collected {} rows ({} header fields)", rows.len(), headers.len());
    Ok(rows)
}

fn lossy_row(record: &ByteRecord) -> SheetRow {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Reads the whole file on a blocking thread. The file is closed before this returns.
pub async fn read_rows(
    path: &Path,
    delimiter: u8,
    emission: HeaderEmission,
) -> Result<Vec<SheetRow>, ImportError> {
    let path: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&path).map_err(|_| ImportError::MissingSource(path.clone()))?;
        collect_rows(file, delimiter, emission).map_err(ImportError::from)
    })
    .await
    .map_err(|e| ImportError::Task(e.to_string()))?
}
