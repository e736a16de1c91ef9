use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{error, info};

use crate::{
    archive::ArchiveFetcher,
    auth::create_sheets_hub,
    cfg::Cfg,
    error::ImportError,
    export::{request_export, ExportClient, ReportRequest},
    importer::{ImportSettings, ImportSummary, ImportTarget, SheetImporter},
    poller::{Clock, ExportPoller, TokioClock},
    sheets::{GoogleSheets, SpreadsheetOps},
};

const USER_AGENT: &str = concat!("connectif_sheets/", env!("CARGO_PKG_VERSION"));

/// Why a run ended before anything was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ReportNotGenerated,
    FileUrlUnavailable,
    ArchiveUnavailable,
    ImportFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Imported(ImportSummary),
    Stopped(StopReason),
}

/// The four stages wired together for one run.
pub struct Pipeline<'a, S: SpreadsheetOps + ?Sized, C: Clock> {
    exports: ExportClient,
    poller: ExportPoller<C>,
    fetcher: ArchiveFetcher,
    sheets: &'a S,
    import_settings: ImportSettings,
    destination: PathBuf,
    file_name: String,
}

impl<'a, S: SpreadsheetOps + ?Sized, C: Clock> Pipeline<'a, S, C> {
    pub fn new(
        exports: ExportClient,
        poller: ExportPoller<C>,
        fetcher: ArchiveFetcher,
        sheets: &'a S,
        import_settings: ImportSettings,
        destination: PathBuf,
        file_name: String,
    ) -> Self {
        Self {
            exports,
            poller,
            fetcher,
            sheets,
            import_settings,
            destination,
            file_name,
        }
    }

    /// Runs request → poll → fetch → import. Stage failures stop the run with
    /// `Ok(RunOutcome::Stopped)`; only unexpected errors come back as `Err`.
    pub async fn run(&self, request: &ReportRequest, target: &ImportTarget) -> Result<RunOutcome> {
        let Some(export_id) = request_export(&self.exports, request).await else {
            error!("The report could not be generated.");
            return Ok(RunOutcome::Stopped(StopReason::ReportNotGenerated));
        };

        let file_url = match self.poller.wait_for_file_url(&self.exports, &export_id).await {
            Some(url) if !url.is_empty() => url,
            _ => {
                error!("Could not get report file URL.");
                return Ok(RunOutcome::Stopped(StopReason::FileUrlUnavailable));
            }
        };
        info!("Report file is ready");

        let Some(archive) = self
            .fetcher
            .fetch_archive(&file_url, &self.destination, &self.file_name)
            .await
        else {
            error!("The report file could not be downloaded.");
            return Ok(RunOutcome::Stopped(StopReason::ArchiveUnavailable));
        };

        info!(
            new_sheet = target.to_new_sheet(),
            append = target.append_existing(),
            sheet = ?target.existing_sheet_name(),
            "Importing {:?}",
            archive.local_path
        );
        let importer = SheetImporter::new(self.sheets, self.import_settings.clone());
        match importer.import(&archive.local_path, target).await {
            Ok(summary) => {
                info!("Imported {} rows into {}", summary.rows_written, summary.range);
                Ok(RunOutcome::Imported(summary))
            }
            Err(ImportError::Sheets(e)) => {
                error!("Error importing data to Google Sheets: {}", e);
                Ok(RunOutcome::Stopped(StopReason::ImportFailed))
            }
            Err(e) => Err(e).with_context(|| format!("Failed to import {:?}", archive.local_path)),
        }
    }
}

/// HTTP client for the export API and the archive download. Each request is bounded
/// by `timeout` so a stalled call cannot outlive the poll deadline.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Builds the real clients from configuration and runs the pipeline once.
pub async fn run_job(cfg: &Cfg) -> Result<RunOutcome> {
    info!("Starting job execution");

    let request = cfg.report_request()?;
    let target = cfg.import_target()?;
    let import_settings = cfg.import_settings(Local::now().date_naive())?;

    let http = http_client(cfg.request_timeout())?;
    let exports = ExportClient::new(http.clone(), &cfg.api_base_url, cfg.api_key.expose())
        .with_delimiter(char::from(import_settings.delimiter));

    let hub = create_sheets_hub(&cfg.credentials_path).await?;
    let sheets = GoogleSheets::new(hub, &cfg.spreadsheet_id);

    let pipeline = Pipeline::new(
        exports,
        ExportPoller::new(cfg.poll_settings(), TokioClock),
        ArchiveFetcher::new(http),
        &sheets,
        import_settings,
        PathBuf::from(&cfg.destination),
        cfg.file_name.clone(),
    );

    pipeline.run(&request, &target).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::archive::testing::zip_bytes;
    use crate::poller::testing::FakeClock;
    use crate::poller::PollSettings;
    use crate::sheets::testing::{Call, FakeSheets};
    use chrono::NaiveDate;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPORT: &str = "day;visits\n2024-01-01;10\n2024-01-02;12\n2024-01-03;9\n";

    fn january() -> ReportRequest {
        ReportRequest {
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            report_id: "abc".to_string(),
        }
    }

    fn settings() -> ImportSettings {
        ImportSettings {
            delimiter: b';',
            sheet_title_prefix: "Datos".to_string(),
            sheet_title_date_format: "%-d/%-m/%Y".to_string(),
            run_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        }
    }

    /// Export service that queues twice, then points at an archive it also serves.
    async fn export_service(archive: Vec<u8>, file_url_path: &str) -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/exports/type/data-explorer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "exp-1" })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/exports/exp-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "queued" })))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;

        let file_url = if file_url_path.is_empty() {
            String::new()
        } else {
            format!("{}{}", server.uri(), file_url_path)
        };
        Mock::given(method("GET"))
            .and(path("/exports/exp-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ready",
                "fileUrl": file_url
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files/y.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        server
    }

    fn pipeline<'a>(
        server: &MockServer,
        sheets: &'a FakeSheets,
        clock: Arc<FakeClock>,
        destination: &TempDir,
    ) -> Pipeline<'a, FakeSheets, Arc<FakeClock>> {
        let http = http_client(Duration::from_secs(5)).unwrap();
        Pipeline::new(
            ExportClient::new(http.clone(), server.uri(), "key"),
            ExportPoller::new(PollSettings::default(), clock),
            ArchiveFetcher::new(http),
            sheets,
            settings(),
            destination.path().to_path_buf(),
            "report".to_string(),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_new_sheet() {
        let server = export_service(zip_bytes(&[("data.csv", REPORT)]), "/files/y.zip").await;
        let sheets = FakeSheets::default();
        let clock = FakeClock::new();
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, clock.clone(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        let summary = match outcome {
            RunOutcome::Imported(summary) => summary,
            other => panic!("expected an import, got {:?}", other),
        };
        assert_eq!(summary.rows_written, 5);
        assert_eq!(summary.range, "'Datos 1/2/2024'!A1");

        let updates = sheets.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.len(), 5);
        assert_eq!(updates[0].1[0], vec!["day".to_string(), "visits".to_string()]);

        // Two queued answers mean two 5s waits on the injected clock.
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert!(dir.path().join("report.csv").is_file());
        assert!(!dir.path().join("data.csv").exists());
    }

    #[tokio::test]
    async fn test_end_to_end_append() {
        let server = export_service(zip_bytes(&[("data.csv", REPORT)]), "/files/y.zip").await;
        let sheets = FakeSheets::with_rows("Historico", 7);
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(false, true, Some("Historico".to_string())).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Imported(_)));
        let updates = sheets.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "Historico!A8");
        assert_eq!(updates[0].1.len(), 3);
    }

    #[tokio::test]
    async fn test_stops_when_report_is_not_generated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let sheets = FakeSheets::default();
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped(StopReason::ReportNotGenerated));
        assert!(sheets.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_empty_file_url() {
        let server = export_service(zip_bytes(&[("data.csv", REPORT)]), "").await;
        let sheets = FakeSheets::default();
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped(StopReason::FileUrlUnavailable));
        assert!(sheets.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_empty_archive() {
        let server = export_service(zip_bytes::<&str>(&[]), "/files/y.zip").await;
        let sheets = FakeSheets::default();
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped(StopReason::ArchiveUnavailable));
        assert!(sheets.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sheets_failure_is_not_fatal() {
        let server = export_service(zip_bytes(&[("data.csv", REPORT)]), "/files/y.zip").await;
        let sheets = FakeSheets {
            fail_update: true,
            ..Default::default()
        };
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped(StopReason::ImportFailed));
        // The added sheet is left in place.
        assert_eq!(sheets.calls()[0], Call::AddSheet("Datos 1/2/2024".to_string()));
    }

    #[tokio::test]
    async fn test_non_utf8_report_is_still_imported() {
        let server = export_service(
            zip_bytes(&[("data.csv", &b"pais;visitas\nEspa\xf1a;10\n"[..])]),
            "/files/y.zip",
        )
        .await;
        let sheets = FakeSheets::default();
        let dir = TempDir::new().unwrap();

        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline(&server, &sheets, FakeClock::new(), &dir)
            .run(&january(), &target)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Imported(_)));
        let updates = sheets.updates();
        assert_eq!(updates[0].1[1], vec!["Espa\u{FFFD}a".to_string(), "10".to_string()]);
    }

    #[tokio::test]
    async fn test_stalled_status_query_stops_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exports/type/data-explorer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "exp-1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/exports/exp-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "queued" }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let sheets = FakeSheets::default();
        let dir = TempDir::new().unwrap();
        let http = http_client(Duration::from_millis(200)).unwrap();
        let pipeline = Pipeline::new(
            ExportClient::new(http.clone(), server.uri(), "key"),
            ExportPoller::new(PollSettings::default(), FakeClock::new()),
            ArchiveFetcher::new(http),
            &sheets,
            settings(),
            dir.path().to_path_buf(),
            "report".to_string(),
        );

        let started = std::time::Instant::now();
        let target = ImportTarget::new(true, false, None).unwrap();
        let outcome = pipeline.run(&january(), &target).await.unwrap();

        assert_eq!(outcome, RunOutcome::Stopped(StopReason::FileUrlUnavailable));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(sheets.calls().is_empty());
    }
}
