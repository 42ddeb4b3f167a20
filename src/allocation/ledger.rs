//! LedgerWriter - best-effort winner record in the external sheet

use std::sync::Arc;
use std::time::Duration;

use crate::platform::{LedgerStore, PlatformError};

/// Rows above the first task (the header)
pub const LEDGER_ROW_OFFSET: u32 = 1;
/// The "Assigned user" column
pub const WINNER_COLUMN: u32 = 4;

/// What happened to a ledger write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Written { attempts: u32 },
    /// No sheet URL or no credentials
    Skipped(String),
    Failed { attempts: u32, error: String },
}

impl LedgerOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, LedgerOutcome::Written { .. })
    }
}

pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    max_attempts: u32,
    base_delay: Duration,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Write `winner_label` into the row for `task_number`.
    ///
    /// Retryable failures back off `base_delay * 2^(attempt-1)`. Exhausting
    /// the attempts is logged as critical and reported, never raised.
    pub async fn record(&self, sheet_url: Option<&str>, task_number: u32, winner_label: &str) -> LedgerOutcome {
        let Some(url) = sheet_url else {
            log::warn!("Sheet URL not configured. Skipping write for Task #{}.", task_number);
            return LedgerOutcome::Skipped("sheet URL not configured".to_string());
        };
        log::info!(
            "Attempting to write to sheet for Task #{} -> Winner: {}",
            task_number,
            winner_label
        );

        let row = task_number.saturating_add(LEDGER_ROW_OFFSET);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.write_once(url, row, winner_label).await {
                Ok(()) => {
                    log::info!(
                        "Successfully updated sheet: Task {} assigned to {}.",
                        task_number,
                        winner_label
                    );
                    return LedgerOutcome::Written { attempts: attempt };
                }
                Err(e) => e,
            };

            match &err {
                PlatformError::NotConfigured(reason) => {
                    log::warn!("Google Sheets not available, skipping write: {}", reason);
                    return LedgerOutcome::Skipped(reason.clone());
                }
                PlatformError::OutOfBounds { .. } => {
                    log::error!("Task #{} row is out of bounds for the sheet.", task_number);
                    return LedgerOutcome::Failed {
                        attempts: attempt,
                        error: err.to_string(),
                    };
                }
                e if !e.is_retryable() => {
                    log::error!("Sheet write for Task #{} failed: {}", task_number, e);
                    return LedgerOutcome::Failed {
                        attempts: attempt,
                        error: err.to_string(),
                    };
                }
                _ => {}
            }

            log::error!("Sheet write attempt {} failed: {}", attempt, err);
            if attempt >= self.max_attempts {
                log::error!(
                    "CRITICAL: Failed to write to sheet for Task #{} after {} attempts.",
                    task_number,
                    attempt
                );
                return LedgerOutcome::Failed {
                    attempts: attempt,
                    error: err.to_string(),
                };
            }

            let backoff = self.base_delay * 2u32.pow(attempt - 1);
            tracing::warn!(
                attempt = attempt,
                task = task_number,
                backoff_ms = backoff.as_millis() as u64,
                "Ledger write failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn write_once(&self, url: &str, row: u32, value: &str) -> Result<(), PlatformError> {
        let sheet = self.store.open_sheet(url).await?;
        self.store.write_cell(&sheet, row, WINNER_COLUMN, value).await
    }
}
