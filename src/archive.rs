use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::error::ArchiveError;

/// Where the unpacked export landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub local_path: PathBuf,
}

/// Downloads an export archive and unpacks its single entry as `<name>.csv`.
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: Client,
}

impl ArchiveFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        logical_name: &str,
    ) -> Result<ArchiveResult, ArchiveError> {
        info!("[ARCHIVE] GET export file");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArchiveError::Download(e.to_string()))?;

        let status = response.status();
        info!("[ARCHIVE] GET export file -> {}", status.as_u16());
        if !status.is_success() {
            return Err(ArchiveError::Http { status: status.as_u16() });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArchiveError::Download(e.to_string()))?;
        debug!("Downloaded {} bytes", bytes.len());

        tokio::fs::create_dir_all(destination).await?;

        let destination = destination.to_path_buf();
        let target = destination.join(format!("{}.csv", logical_name));

        tokio::task::spawn_blocking(move || unpack(&bytes, &destination, &target))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }

    /// Archive Fetcher stage: failures are logged and collapse to `None`.
    pub async fn fetch_archive(
        &self,
        url: &str,
        destination: &Path,
        logical_name: &str,
    ) -> Option<ArchiveResult> {
        match self.fetch(url, destination, logical_name).await {
            Ok(result) => {
                info!("ZIP file downloaded and unzipped successfully: {:?}", result.local_path);
                Some(result)
            }
            Err(e) => {
                error!("Error downloading or unzipping ZIP file: {}", e);
                None
            }
        }
    }
}

/// Writes the archive to a temporary file in `destination`, extracts every entry there
/// and renames entry #0 to `target`. The temporary archive is removed on return.
fn unpack(bytes: &[u8], destination: &Path, target: &Path) -> Result<ArchiveResult, ArchiveError> {
    let mut temp = tempfile::Builder::new()
        .prefix("temp")
        .suffix(".zip")
        .tempfile_in(destination)?;
    temp.write_all(bytes)?;
    temp.flush()?;

    let mut archive = ZipArchive::new(temp.reopen()?)?;
    if archive.is_empty() {
        return Err(ArchiveError::Empty);
    }

    let first_name = archive.by_index(0)?.name().to_string();
    let mut first_path = None;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // File::create truncates, so a name collision is overwritten.
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        debug!("Extracted {:?}", out_path);

        if index == 0 {
            first_path = Some(out_path);
        }
    }

    let first_path = first_path.ok_or(ArchiveError::MissingEntry(first_name))?;
    if first_path.as_path() != target {
        fs::rename(&first_path, target)?;
    }

    Ok(ArchiveResult {
        local_path: target.to_path_buf(),
    })
}
