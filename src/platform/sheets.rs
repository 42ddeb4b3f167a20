//! Google Sheets adapter
//!
//! Implements LedgerStore over the Sheets v4 REST API using a pre-issued
//! OAuth bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::discord::encode_path_segment;
use super::{LedgerStore, PlatformError, SheetHandle};

/// Default Sheets API base URL
pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: SHEETS_API_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Sheets client. Without a token every call reports `NotConfigured`.
pub struct SheetsClient {
    client: Client,
    token: Option<String>,
    config: SheetsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    row_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    title: String,
    grid_properties: GridProperties,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

impl SheetsClient {
    pub fn new(token: Option<String>, config: SheetsConfig) -> Result<Self, PlatformError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, token, config })
    }

    /// Read the bearer token from an environment variable; a missing token disables writes
    pub fn from_env(token_env: &str, config: SheetsConfig) -> Result<Self, PlatformError> {
        let token = std::env::var(token_env).ok();
        if token.is_none() {
            log::warn!("{} not set. Google Sheets functionality will be disabled.", token_env);
        }
        Self::new(token, config)
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    fn token(&self) -> Result<&str, PlatformError> {
        self.token
            .as_deref()
            .ok_or_else(|| PlatformError::NotConfigured("Google Sheets API not initialized".to_string()))
    }
}

#[async_trait]
impl LedgerStore for SheetsClient {
    async fn open_sheet(&self, url: &str) -> Result<SheetHandle, PlatformError> {
        let token = self.token()?;
        let sheet_id = extract_sheet_id(url).ok_or_else(|| PlatformError::InvalidUrl(url.to_string()))?;

        let response = self
            .client
            .get(format!("{}/spreadsheets/{}", self.config.api_base, sheet_id))
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status.as_u16(), body));
        }
        let spreadsheet: Spreadsheet = response.json().await?;
        let first = spreadsheet
            .sheets
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound(format!("spreadsheet {} has no worksheets", sheet_id)))?;

        Ok(SheetHandle {
            sheet_id,
            worksheet: first.properties.title,
            row_count: first.properties.grid_properties.row_count,
        })
    }

    async fn write_cell(&self, sheet: &SheetHandle, row: u32, col: u32, value: &str) -> Result<(), PlatformError> {
        let token = self.token()?;
        if row > sheet.row_count {
            return Err(PlatformError::OutOfBounds {
                row,
                rows: sheet.row_count,
            });
        }
        let range = format!("'{}'!{}{}", sheet.worksheet, column_letter(col), row);
        let response = self
            .client
            .put(format!(
                "{}/spreadsheets/{}/values/{}",
                self.config.api_base,
                sheet.sheet_id,
                encode_path_segment(&range)
            ))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&json!({ "range": range, "values": [[value]] }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::from_status(status.as_u16(), body));
        }
        Ok(())
    }
}

/// Extract the spreadsheet id from a sheet URL (the path segment after `/d/`)
pub fn extract_sheet_id(url: &str) -> Option<String> {
    let start = url.find("/d/")? + 3;
    let id: String = url[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.is_empty() { None } else { Some(id) }
}

/// Convert a 1-based column number to A1 notation letters
pub fn column_letter(col: u32) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}
