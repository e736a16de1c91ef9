//! Loads the unpacked export into the spreadsheet.
//!
//! Three write modes:
//! - new sheet: header + records + one blank row at A1 of a freshly added tab
//! - append: records only, starting at the first free row of an existing sheet
//! - overwrite: records only, starting at A1 of an existing sheet

use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{ImportError, TargetError};
use crate::sheets::{quote_sheet_name, row_anchor, SpreadsheetOps};
use crate::transform::{read_rows, HeaderEmission};

/// Overwrite mode pushes the header ahead of every record, and only the first header
/// is dropped before writing. Flip to `false` to emit it once like the other modes.
pub const OVERWRITE_REPEATS_HEADER: bool = true;

pub const DEFAULT_SHEET_TITLE_PREFIX: &str = "Datos";
pub const DEFAULT_SHEET_TITLE_DATE_FORMAT: &str = "%-d/%-m/%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportMode {
    NewSheet,
    Append { sheet: String },
    Overwrite { sheet: String },
}

impl ImportMode {
    fn header_emission(&self) -> HeaderEmission {
        match self {
            ImportMode::Overwrite { .. } if OVERWRITE_REPEATS_HEADER => HeaderEmission::BeforeEveryRecord,
            _ => HeaderEmission::Once,
        }
    }
}

/// Where the rows go. Writing anywhere but a new sheet needs an existing sheet name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    mode: ImportMode,
}

impl ImportTarget {
    pub fn new(
        to_new_sheet: bool,
        append_existing: bool,
        existing_sheet_name: Option<String>,
    ) -> Result<Self, TargetError> {
        if to_new_sheet {
            return Ok(Self { mode: ImportMode::NewSheet });
        }

        let sheet = existing_sheet_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(TargetError::MissingSheetName)?;

        let mode = if append_existing {
            ImportMode::Append { sheet }
        } else {
            ImportMode::Overwrite { sheet }
        };
        Ok(Self { mode })
    }

    pub fn mode(&self) -> &ImportMode {
        &self.mode
    }

    pub fn to_new_sheet(&self) -> bool {
        self.mode == ImportMode::NewSheet
    }

    pub fn append_existing(&self) -> bool {
        matches!(self.mode, ImportMode::Append { .. })
    }

    pub fn existing_sheet_name(&self) -> Option<&str> {
        match &self.mode {
            ImportMode::NewSheet => None,
            ImportMode::Append { sheet } | ImportMode::Overwrite { sheet } => Some(sheet),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub delimiter: u8,
    pub sheet_title_prefix: String,
    pub sheet_title_date_format: String,
    pub run_date: NaiveDate,
}

impl ImportSettings {
    pub fn new_sheet_title(&self) -> String {
        format!(
            "{} {}",
            self.sheet_title_prefix,
            self.run_date.format(&self.sheet_title_date_format)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub sheet_title: String,
    pub range: String,
    pub rows_written: usize,
}

pub struct SheetImporter<'a, S: SpreadsheetOps + ?Sized> {
    sheets: &'a S,
    settings: ImportSettings,
}

impl<'a, S: SpreadsheetOps + ?Sized> SheetImporter<'a, S> {
    pub fn new(sheets: &'a S, settings: ImportSettings) -> Self {
        Self { sheets, settings }
    }

    /// Parses `source` completely, then issues the spreadsheet writes.
    pub async fn import(
        &self,
        source: &Path,
        target: &ImportTarget,
    ) -> Result<ImportSummary, ImportError> {
        let start_row = match target.mode() {
            ImportMode::Append { sheet } => {
                let existing = self.sheets.read_values(&quote_sheet_name(sheet)).await?;
                debug!("Sheet {:?} holds {} rows", sheet, existing.len());
                existing.len() + 1
            }
            _ => 1,
        };

        let mut rows = read_rows(source, self.settings.delimiter, target.mode().header_emission()).await?;
        info!("Read {} rows from {:?}", rows.len(), source);

        match target.mode() {
            ImportMode::NewSheet => {
                rows.push(Vec::new());
                let title = self.sheets.add_sheet(&self.settings.new_sheet_title()).await?;
                let range = row_anchor(&title, 1);
                let rows_written = rows.len();

                self.sheets.update_values(&range, rows).await?;
                info!("Data imported to a new sheet in Google Sheets successfully ({})", range);

                Ok(ImportSummary {
                    sheet_title: title,
                    range,
                    rows_written,
                })
            }
            ImportMode::Append { sheet } | ImportMode::Overwrite { sheet } => {
                let data: Vec<_> = rows.into_iter().skip(1).collect();
                let range = row_anchor(sheet, start_row);
                let rows_written = data.len();

                if data.is_empty() {
                    info!("No data rows to write to {}", range);
                } else {
                    self.sheets.update_values(&range, data).await?;
                    info!("Data imported to existing sheet in Google Sheets successfully ({})", range);
                }

                Ok(ImportSummary {
                    sheet_title: sheet.clone(),
                    range,
                    rows_written,
                })
            }
        }
    }
}
