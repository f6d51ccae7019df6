use std::io;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{http::client::RequestError, normalize::NormalizationError, store::documents::StoreError};

/// One day's prices and traded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarFields {
    pub open: u64,
    pub high: u64,
    pub low: u64,
    pub close: u64,
    pub volume: u64,
}

/// Payload of a normalized source observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Bar(BarFields),
    Dividend { amount: u64 },
}

/// A validated observation for one instrument on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub code: String,
    pub date: NaiveDate,
    pub payload: Payload,
}

/// Identity row of an instrument in the relational source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub code: String,
    pub name: String,
    pub period: String,
}

/// A user's horizontal chart line from the relational source.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizontalLine {
    pub id: i64,
    pub stock_code: String,
    pub price: f64,
    pub color: String,
    pub line_style: i64,
    pub line_width: i64,
    pub memo: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Run-level error taxonomy.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Fatal; raised before any write happens.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    /// Retryable network or store failure.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    /// The upstream rejected the request or had no data.
    #[error("upstream error: {0}")]
    TerminalApi(String),
    #[error("failed to persist run metadata: {0}")]
    Persistence(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo(_))
    }
}

impl From<RequestError> for SyncError {
    fn from(value: RequestError) -> Self {
        if value.is_transient() {
            Self::TransientIo(value.to_string())
        } else {
            Self::TerminalApi(value.to_string())
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        if value.is_transient() {
            Self::TransientIo(value.to_string())
        } else {
            Self::Store(value.to_string())
        }
    }
}
