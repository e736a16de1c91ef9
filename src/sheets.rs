use futures::future::BoxFuture;
use google_sheets4::api::{
    AddSheetRequest, BatchUpdateSpreadsheetRequest, Request, SheetProperties, ValueRange,
};
use google_sheets4::{hyper, hyper_rustls, Sheets};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SheetsError;
use crate::transform::SheetRow;

pub type SheetsHub = Sheets<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Input is parsed as if typed into the UI (numbers, dates, formulas).
const USER_ENTERED: &str = "USER_ENTERED";

static PLAIN_SHEET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid sheet name regex"));

static CELL_LIKE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:[A-Z]{1,3}[0-9]+|R[0-9]+C[0-9]+)$").expect("valid cell reference regex")
});

/// The spreadsheet operations the importer needs.
pub trait SpreadsheetOps: Send + Sync {
    /// Values of `range`, trailing empty rows trimmed by the backend.
    fn read_values<'a>(&'a self, range: &'a str) -> BoxFuture<'a, Result<Vec<Vec<Value>>, SheetsError>>;

    /// Adds a sheet tab and returns the title the backend assigned.
    fn add_sheet<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<String, SheetsError>>;

    /// Writes `rows` starting at the top-left cell of `range`.
    fn update_values<'a>(
        &'a self,
        range: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), SheetsError>>;
}

/// Google Sheets backend bound to one spreadsheet.
pub struct GoogleSheets {
    hub: SheetsHub,
    spreadsheet_id: String,
}

impl GoogleSheets {
    pub fn new(hub: SheetsHub, spreadsheet_id: impl Into<String>) -> Self {
        Self {
            hub,
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    async fn get(&self, range: &str) -> Result<Vec<Vec<Value>>, SheetsError> {
        debug!("Reading values from range {}", range);

        let (_, value_range) = self
            .hub
            .spreadsheets()
            .values_get(&self.spreadsheet_id, range)
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .map_err(api_error)?;

        Ok(value_range.values.unwrap_or_default())
    }

    async fn add(&self, title: &str) -> Result<String, SheetsError> {
        info!("Adding sheet {:?}", title);

        let request = BatchUpdateSpreadsheetRequest {
            requests: Some(vec![Request {
                add_sheet: Some(AddSheetRequest {
                    properties: Some(SheetProperties {
                        title: Some(title.to_string()),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let (_, response) = self
            .hub
            .spreadsheets()
            .batch_update(request, &self.spreadsheet_id)
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .map_err(api_error)?;

        response
            .replies
            .and_then(|replies| replies.into_iter().next())
            .and_then(|reply| reply.add_sheet)
            .and_then(|added| added.properties)
            .and_then(|properties| properties.title)
            .ok_or(SheetsError::MissingReply("addSheet.properties.title"))
    }

    async fn update(&self, range: &str, rows: Vec<SheetRow>) -> Result<(), SheetsError> {
        info!("Writing {} rows at {}", rows.len(), range);

        let values = rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::String).collect())
            .collect();
        let request = ValueRange {
            values: Some(values),
            ..Default::default()
        };

        self.hub
            .spreadsheets()
            .values_update(request, &self.spreadsheet_id, range)
            .value_input_option(USER_ENTERED)
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .map_err(api_error)?;

        Ok(())
    }
}

impl SpreadsheetOps for GoogleSheets {
    fn read_values<'a>(&'a self, range: &'a str) -> BoxFuture<'a, Result<Vec<Vec<Value>>, SheetsError>> {
        Box::pin(self.get(range))
    }

    fn add_sheet<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<String, SheetsError>> {
        Box::pin(self.add(title))
    }

    fn update_values<'a>(
        &'a self,
        range: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), SheetsError>> {
        Box::pin(self.update(range, rows))
    }
}

fn api_error(e: google_sheets4::Error) -> SheetsError {
    SheetsError::Api(e.to_string())
}

/// Sheet name as it must appear in A1 notation.
pub fn quote_sheet_name(name: &str) -> String {
    let already_quoted = name.len() >= 2 && name.starts_with('\'') && name.ends_with('\'');
    if already_quoted || (PLAIN_SHEET_NAME.is_match(name) && !CELL_LIKE_NAME.is_match(name)) {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// `<sheet>!A<row>`, rows being 1-based.
pub fn row_anchor(sheet: &str, row: usize) -> String {
    format!("{}!A{}", quote_sheet_name(sheet), row)
}
