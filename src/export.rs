//! Client for the Connectif export API.
//!
//! Covers the two calls the pipeline needs:
//! - `POST /exports/type/data-explorer` to request a report export
//! - `GET /exports/{id}` to read the export status and file URL
//!
//! The API key is sent raw in the `Authorization` header and is never logged.

use chrono::NaiveDate;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ExportError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.connectif.cloud";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// What to export: one report over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub report_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Ready,
    #[default]
    #[serde(other)]
    Other,
}

/// Snapshot of a server-side export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub id: String,
    pub status: ExportStatus,
    pub file_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateExportRequest<'a> {
    delimiter: String,
    filters: ExportFilters<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportFilters<'a> {
    from_date: String,
    report_id: &'a str,
    to_date: String,
}

#[derive(Debug, Deserialize)]
struct CreateExportResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportStatusResponse {
    #[serde(default)]
    status: ExportStatus,
    #[serde(default)]
    file_url: Option<String>,
}

/// Source of export job snapshots, so the poller can be driven by test fakes.
pub trait ExportStatusSource: Send + Sync {
    fn fetch_status<'a>(&'a self, export_id: &'a str)
        -> BoxFuture<'a, Result<ExportJob, ExportError>>;
}

#[derive(Clone)]
pub struct ExportClient {
    client: Client,
    base_url: String,
    api_key: String,
    delimiter: char,
}

impl ExportClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            delimiter: ';',
        }
    }

    /// Field delimiter the export service should use for the generated file.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Requests a new export and returns its id.
    pub async fn create_export(&self, request: &ReportRequest) -> Result<String, ExportError> {
        let url = format!("{}/exports/type/data-explorer", self.base_url);
        let body = CreateExportRequest {
            delimiter: self.delimiter.to_string(),
            filters: ExportFilters {
                from_date: request.from_date.format(DATE_FORMAT).to_string(),
                report_id: &request.report_id,
                to_date: request.to_date.format(DATE_FORMAT).to_string(),
            },
        };

        info!("[EXPORT] POST /exports/type/data-explorer (report {})", request.report_id);

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExportError::ConnectionFailed(format!("Export request failed: {}", e)))?;

        let status = response.status();
        info!("[EXPORT] POST /exports/type/data-explorer -> {}", status.as_u16());

        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let created: CreateExportResponse = response.json().await.map_err(|e| {
            ExportError::InvalidResponse(format!("Failed to parse export creation response: {}", e))
        })?;

        if created.id.is_empty() {
            return Err(ExportError::InvalidResponse("export id is empty".to_string()));
        }

        Ok(created.id)
    }

    /// Reads the current state of an export.
    pub async fn get_export(&self, export_id: &str) -> Result<ExportJob, ExportError> {
        let url = format!("{}/exports/{}", self.base_url, export_id);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ExportError::ConnectionFailed(format!("Export status check failed: {}", e)))?;

        let status = response.status();
        info!("[EXPORT] GET /exports/{} -> {}", redact_id(export_id), status.as_u16());

        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let body: ExportStatusResponse = response.json().await.map_err(|e| {
            ExportError::InvalidResponse(format!("Failed to parse export status response: {}", e))
        })?;

        Ok(ExportJob {
            id: export_id.to_string(),
            status: body.status,
            file_url: body.file_url,
        })
    }
}

impl ExportStatusSource for ExportClient {
    fn fetch_status<'a>(
        &'a self,
        export_id: &'a str,
    ) -> BoxFuture<'a, Result<ExportJob, ExportError>> {
        Box::pin(self.get_export(export_id))
    }
}

/// Export Requester stage: failures are logged and collapse to `None`.
pub async fn request_export(client: &ExportClient, request: &ReportRequest) -> Option<String> {
    match client.create_export(request).await {
        Ok(id) => {
            info!("Export {} requested for {}..{}", redact_id(&id), request.from_date, request.to_date);
            Some(id)
        }
        Err(e) => {
            error!("Error generating report: {}", e);
            None
        }
    }
}

async fn api_error(response: reqwest::Response) -> ExportError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));
    ExportError::Api { status, body }
}

/// Shows the first 8 characters of an export id.
pub fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((cut, _)) => format!("{}...", &id[..cut]),
        None => id.to_string(),
    }
}
