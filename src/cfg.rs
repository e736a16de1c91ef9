use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use config::{Config, File};
use tracing::{debug, info};

use crate::args::Args;
use crate::export::{ReportRequest, DEFAULT_API_BASE_URL};
use crate::importer::{
    ImportSettings, ImportTarget, DEFAULT_SHEET_TITLE_DATE_FORMAT, DEFAULT_SHEET_TITLE_PREFIX,
};
use crate::poller::{PollSettings, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// API key that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(<redacted>)")
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub api_base_url: String,
    pub api_key: ApiKey,
    pub credentials_path: String,
    pub spreadsheet_id: String,
    pub report_id: String,
    pub file_name: String,
    pub from_date: String,
    pub to_date: String,
    pub destination: String,
    pub new_sheet: bool,
    pub append: bool,
    pub existing_sheet: Option<String>,
    pub delimiter: String,
    pub poll: PollConfig,
    pub sheet_title: SheetTitleConfig,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Upper bound for a single HTTP request (status query or download).
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SheetTitleConfig {
    pub prefix: String,
    pub date_format: String,
}

impl Cfg {
    pub fn load(args: Args) -> Result<Self> {
        info!("Loading configuration from: {}", args.config);

        // Start with defaults
        let mut cfg = Cfg::default();

        if Path::new(&args.config).exists() {
            let config = Config::builder()
                .add_source(File::with_name(&args.config).required(false))
                .build()
                .with_context(|| format!("Could not parse config file {}", args.config))?;
            cfg.apply_file(&config)?;
            debug!("Loaded configuration from file");
        } else {
            debug!("Config file not found, using defaults");
        }

        cfg.apply_args(args);

        debug!("Final configuration: {:?}", cfg);
        Ok(cfg)
    }

    fn apply_file(&mut self, config: &Config) -> Result<()> {
        let string = |key: &str| config.get_string(key).ok();

        if let Some(v) = string("api_base_url") {
            self.api_base_url = v;
        }
        if let Some(v) = string("api_key") {
            self.api_key = ApiKey(v);
        }
        if let Some(v) = string("credentials_path") {
            self.credentials_path = v;
        }
        if let Some(v) = string("spreadsheet_id") {
            self.spreadsheet_id = v;
        }
        if let Some(v) = string("report_id") {
            self.report_id = v;
        }
        if let Some(v) = string("file_name") {
            self.file_name = v;
        }
        if let Some(v) = string("from_date") {
            self.from_date = v;
        }
        if let Some(v) = string("to_date") {
            self.to_date = v;
        }
        if let Some(v) = string("destination") {
            self.destination = v;
        }
        if let Some(v) = string("existing_sheet") {
            self.existing_sheet = Some(v);
        }
        if let Some(v) = string("delimiter") {
            self.delimiter = v;
        }
        if let Some(v) = string("sheet_title.prefix") {
            self.sheet_title.prefix = v;
        }
        if let Some(v) = string("sheet_title.date_format") {
            self.sheet_title.date_format = v;
        }

        if let Ok(v) = config.get_bool("new_sheet") {
            self.new_sheet = v;
        }
        if let Ok(v) = config.get_bool("append") {
            self.append = v;
        }

        if let Ok(v) = config.get_int("poll.interval_secs") {
            self.poll.interval_secs =
                u64::try_from(v).context("poll.interval_secs must not be negative")?;
        }
        if let Ok(v) = config.get_int("poll.timeout_secs") {
            self.poll.timeout_secs =
                u64::try_from(v).context("poll.timeout_secs must not be negative")?;
        }
        if let Ok(v) = config.get_int("poll.request_timeout_secs") {
            self.poll.request_timeout_secs =
                u64::try_from(v).context("poll.request_timeout_secs must not be negative")?;
        }

        Ok(())
    }

    fn apply_args(&mut self, args: Args) {
        if let Some(api_key) = args.api_key {
            self.api_key = ApiKey(api_key);
        }
        if let Some(credentials) = args.credentials {
            self.credentials_path = credentials;
        }
        if let Some(spreadsheet_id) = args.spreadsheet_id {
            self.spreadsheet_id = spreadsheet_id;
        }
        if let Some(report_id) = args.report_id {
            self.report_id = report_id;
        }
        if let Some(file_name) = args.file_name {
            self.file_name = file_name;
        }
        if let Some(from_date) = args.from_date {
            self.from_date = from_date;
        }
        if let Some(to_date) = args.to_date {
            self.to_date = to_date;
        }
        if let Some(destination) = args.destination {
            self.destination = destination;
        }
        if let Some(existing_sheet) = args.existing_sheet {
            self.existing_sheet = Some(existing_sheet);
        }

        // Flags can only switch a mode on
        self.new_sheet |= args.new_sheet;
        self.append |= args.append;
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("api key (--apikey)", self.api_key.expose()),
            ("credentials path (--credentials)", self.credentials_path.as_str()),
            ("spreadsheet id (--spreadsheetid)", self.spreadsheet_id.as_str()),
            ("report id (--reportid)", self.report_id.as_str()),
            ("file name (--filename)", self.file_name.as_str()),
            ("destination (--destination)", self.destination.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("{} must be set", name);
            }
        }

        if self.file_name.contains(['/', '\\']) {
            anyhow::bail!("file name must not contain path separators: {}", self.file_name);
        }

        let request = self.report_request()?;
        if request.from_date > request.to_date {
            anyhow::bail!(
                "from date ({}) cannot be after to date ({})",
                request.from_date,
                request.to_date
            );
        }

        self.delimiter_byte()?;
        self.import_target()?;

        if self.poll.interval_secs == 0
            || self.poll.timeout_secs == 0
            || self.poll.request_timeout_secs == 0
        {
            anyhow::bail!(
                "poll.interval_secs, poll.timeout_secs and poll.request_timeout_secs must be >= 1"
            );
        }

        if StrftimeItems::new(&self.sheet_title.date_format).any(|item| matches!(item, Item::Error)) {
            anyhow::bail!("Invalid sheet_title.date_format: {}", self.sheet_title.date_format);
        }

        if self.new_sheet && self.append {
            info!("Both new sheet and append requested; writing to a new sheet");
        }

        info!("Configuration validation passed");
        Ok(())
    }

    pub fn report_request(&self) -> Result<ReportRequest> {
        Ok(ReportRequest {
            from_date: parse_date("from date (--fromdate)", &self.from_date)?,
            to_date: parse_date("to date (--todate)", &self.to_date)?,
            report_id: self.report_id.clone(),
        })
    }

    pub fn import_target(&self) -> Result<ImportTarget> {
        ImportTarget::new(self.new_sheet, self.append, self.existing_sheet.clone())
            .context("Use --existingsheet with --append, or pass --newspreadsheet")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.request_timeout_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll.interval_secs),
            timeout: Duration::from_secs(self.poll.timeout_secs),
        }
    }

    pub fn import_settings(&self, run_date: NaiveDate) -> Result<ImportSettings> {
        Ok(ImportSettings {
            delimiter: self.delimiter_byte()?,
            sheet_title_prefix: self.sheet_title.prefix.clone(),
            sheet_title_date_format: self.sheet_title.date_format.clone(),
            run_date,
        })
    }

    fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] if b.is_ascii() && !matches!(*b, b'"' | b'\n' | b'\r') => Ok(*b),
            _ => anyhow::bail!("delimiter must be a single ASCII character, got {:?}", self.delimiter),
        }
    }
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("{} must be YYYY-MM-DD, got {:?}", name, value))
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: ApiKey::default(),
            credentials_path: String::new(),
            spreadsheet_id: String::new(),
            report_id: String::new(),
            file_name: String::new(),
            from_date: String::new(),
            to_date: String::new(),
            destination: String::new(),
            new_sheet: false,
            append: false,
            existing_sheet: None,
            delimiter: ";".to_string(),
            poll: PollConfig {
                interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
                timeout_secs: DEFAULT_POLL_TIMEOUT.as_secs(),
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            sheet_title: SheetTitleConfig {
                prefix: DEFAULT_SHEET_TITLE_PREFIX.to_string(),
                date_format: DEFAULT_SHEET_TITLE_DATE_FORMAT.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::ImportMode;
    use clap::Parser;
    use std::io::Write;

    const REQUIRED: [&str; 17] = [
        "connectif_sheets",
        "-k", "key",
        "-c", "creds.json",
        "-s", "sheet-id",
        "-r", "abc",
        "-f", "report",
        "-o", "2024-01-01",
        "-t", "2024-01-31",
        "-d", "/tmp/out",
    ];

    fn args(extra: &[&str]) -> Args {
        let mut argv: Vec<&str> = REQUIRED.to_vec();
        argv.extend_from_slice(&["--config", "/nonexistent/config.toml"]);
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cli_values_build_request_and_target() {
        let cfg = Cfg::load(args(&["-n"])).unwrap();
        cfg.validate().unwrap();

        let request = cfg.report_request().unwrap();
        assert_eq!(request.from_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(request.to_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(request.report_id, "abc");
        assert_eq!(cfg.import_target().unwrap().mode(), &ImportMode::NewSheet);
        assert_eq!(cfg.poll_settings(), PollSettings::default());
        assert_eq!(cfg.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_append_needs_sheet_name() {
        let cfg = Cfg::load(args(&["-a"])).unwrap();
        assert!(cfg.validate().is_err());

        let cfg = Cfg::load(args(&["-a", "-e", "Historico"])).unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.import_target().unwrap().mode(),
            &ImportMode::Append { sheet: "Historico".into() }
        );
    }

    #[test]
    fn test_rejects_bad_dates() {
        let mut cfg = Cfg::load(args(&["-n"])).unwrap();
        cfg.from_date = "01/01/2024".to_string();
        assert!(cfg.validate().is_err());

        cfg.from_date = "2024-02-01".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_delimiter_and_title_format() {
        let mut cfg = Cfg::load(args(&["-n"])).unwrap();
        cfg.delimiter = ";;".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Cfg::load(args(&["-n"])).unwrap();
        cfg.sheet_title.date_format = "%Q".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_file_then_cli_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_base_url = "http://localhost:9999"
report_id = "from-file"
append = true
existing_sheet = "Historico"
delimiter = ","

[poll]
interval_secs = 2
timeout_secs = 10
request_timeout_secs = 4

[sheet_title]
prefix = "Data"
"#
        )
        .unwrap();

        let config_path = file.path().to_str().unwrap().to_string();
        let mut argv: Vec<&str> = REQUIRED.to_vec();
        argv.extend_from_slice(&["--config", &config_path]);
        let cfg = Cfg::load(Args::parse_from(argv)).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.api_base_url, "http://localhost:9999");
        // CLI wins over the file
        assert_eq!(cfg.report_id, "abc");
        assert!(cfg.append);
        assert_eq!(cfg.existing_sheet.as_deref(), Some("Historico"));
        assert_eq!(cfg.poll_settings().interval, Duration::from_secs(2));
        assert_eq!(cfg.poll_settings().timeout, Duration::from_secs(10));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(4));

        let settings = cfg.import_settings(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).unwrap();
        assert_eq!(settings.delimiter, b',');
        assert_eq!(settings.new_sheet_title(), "Data 9/3/2024");
    }

    #[test]
    fn test_debug_output_hides_api_key() {
        let cfg = Cfg::load(args(&["-n"])).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("\"key\""));
        assert!(printed.contains("ApiKey(<redacted>)"));
    }
}
