use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "connectif_sheets")]
#[command(about = "Generate and download Connectif reports and upload them to Google Sheets")]
#[command(version)]
pub struct Args {
    /// Connectif API key
    #[arg(short = 'k', long = "apikey", value_name = "APIKEY")]
    pub api_key: Option<String>,

    /// Path to the Google service account JSON credentials file
    #[arg(short = 'c', long = "credentials", value_name = "PATH")]
    pub credentials: Option<String>,

    /// Destination Google Sheets spreadsheet ID
    #[arg(short = 's', long = "spreadsheetid", value_name = "SPREADSHEET_ID")]
    pub spreadsheet_id: Option<String>,

    /// Connectif report ID
    #[arg(short = 'r', long = "reportid", value_name = "REPORT_ID")]
    pub report_id: Option<String>,

    /// Name for the extracted CSV file (without extension)
    #[arg(short = 'f', long = "filename", value_name = "NAME")]
    pub file_name: Option<String>,

    /// First day of the report, YYYY-MM-DD
    #[arg(short = 'o', long = "fromdate", value_name = "DATE")]
    pub from_date: Option<String>,

    /// Last day of the report, YYYY-MM-DD
    #[arg(short = 't', long = "todate", value_name = "DATE")]
    pub to_date: Option<String>,

    /// Directory to download and extract the ZIP file into
    #[arg(short = 'd', long = "destination", value_name = "DIR")]
    pub destination: Option<String>,

    /// Add the data to a new sheet
    #[arg(short = 'n', long = "newspreadsheet")]
    pub new_sheet: bool,

    /// Append the data to an existing sheet
    #[arg(short = 'a', long = "append")]
    pub append: bool,

    /// Name of the existing sheet to write into
    #[arg(short = 'e', long = "existingsheet", value_name = "SHEET")]
    pub existing_sheet: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to config file
    #[arg(long, default_value = "config/config.toml")]
    pub config: String,
}
