use anyhow::{Context, Result};
use google_sheets4::{hyper, hyper_rustls, Sheets};
use tracing::info;
use yup_oauth2::{read_service_account_key, ServiceAccountAuthenticator};

use crate::sheets::SheetsHub;

/// Builds an authenticated Sheets hub from a service account key file.
pub async fn create_sheets_hub(credentials_path: &str) -> Result<SheetsHub> {
    info!("Initializing Google Sheets authentication");

    let key = read_service_account_key(credentials_path)
        .await
        .with_context(|| format!("Failed to read service account key from {}", credentials_path))?;

    let auth = ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .context("Failed to build service account authenticator")?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .context("Failed to load native TLS root certificates")?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper::Client::builder().build::<_, hyper::Body>(https);

    Ok(Sheets::new(client, auth))
}
