//! Output sinks for validated transactions.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use spendtrack_core::Transaction;

#[allow(async_fn_in_trait)]
pub trait OutputSink {
    async fn append(&self, transactions: &[Transaction]) -> Result<()>;
}

/// Appends rows to a Google Sheet, one row per transaction in
/// date/time/merchant/amount/currency/category/account order.
pub struct SheetsSink {
    client: reqwest::Client,
    token: String,
    spreadsheet_id: String,
    range: String,
}

impl SheetsSink {
    pub fn new(token: String, spreadsheet_id: String, range: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            spreadsheet_id,
            range,
        }
    }
}

impl OutputSink for SheetsSink {
    async fn append(&self, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }

        #[derive(serde::Serialize)]
        struct AppendRequest {
            values: Vec<Vec<String>>,
        }

        let body = AppendRequest {
            values: transactions.iter().map(Transaction::to_sheet_row).collect(),
        };

        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}:append",
            self.spreadsheet_id, self.range
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .query(&[
                // USER_ENTERED so the sheet parses dates and amounts.
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&body)
            .send()
            .await
            .context("sheets append request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("sheets append failed: {status} {text}");
        }
        info!(rows = transactions.len(), "appended rows to sheet");
        Ok(())
    }
}

/// Appends to a local JSON array file. Survives runs with no Sheets access
/// and doubles as the audit trail of everything ever uploaded.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OutputSink for JsonFileSink {
    async fn append(&self, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut all: Vec<Transaction> = if self.path.exists() {
            let s = fs::read_to_string(&self.path)
                .with_context(|| format!("read {}", self.path.display()))?;
            serde_json::from_str(&s).with_context(|| format!("parse {}", self.path.display()))?
        } else {
            Vec::new()
        };
        all.extend(transactions.iter().cloned());

        let s = serde_json::to_string_pretty(&all).context("serialize transactions")?;
        fs::write(&self.path, s).with_context(|| format!("write {}", self.path.display()))?;
        info!(rows = transactions.len(), path = %self.path.display(), "wrote transactions");
        Ok(())
    }
}
