use std::env;

use crate::{
    constants::{DEFAULT_BATCH_SIZE, DEFAULT_USER_ID, STORE_BATCH_LIMIT},
    instruments,
    model::{Result, SyncError},
};

// Production endpoint of the Korea Investment & Securities open API.
const DEFAULT_KIS_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KisCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub base_url: String,
}

/// Settings read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store_path: String,
    pub source_db_path: Option<String>,
    pub kis: Option<KisCredentials>,
    /// `INSTRUMENT_CODES`, when set and non-empty.
    pub instrument_override: Option<Vec<String>>,
    pub default_user_id: String,
    pub batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store_path = get("STORE_PATH")
            .ok_or_else(|| SyncError::Configuration("missing environment variable: STORE_PATH".into()))?;

        let kis = match (get("KIS_APP_KEY"), get("KIS_APP_SECRET")) {
            (Some(app_key), Some(app_secret)) => Some(KisCredentials {
                app_key,
                app_secret,
                base_url: get("KIS_BASE_URL").unwrap_or_else(|| DEFAULT_KIS_BASE_URL.to_string()),
            }),
            _ => None,
        };

        let batch_size = match get("BATCH_SIZE") {
            None => DEFAULT_BATCH_SIZE,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if (1..=STORE_BATCH_LIMIT).contains(&n) => n,
                _ => {
                    return Err(SyncError::Configuration(format!(
                        "BATCH_SIZE must be between 1 and {STORE_BATCH_LIMIT}, got '{raw}'"
                    )));
                }
            },
        };

        Ok(Self {
            store_path,
            source_db_path: get("SOURCE_DB_PATH"),
            kis,
            instrument_override: get("INSTRUMENT_CODES")
                .map(|raw| instruments::parse_codes(&raw))
                .filter(|codes| !codes.is_empty()),
            default_user_id: get("DEFAULT_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            batch_size,
        })
    }

    pub fn require_kis(&self) -> Result<&KisCredentials> {
        self.kis.as_ref().ok_or_else(|| {
            SyncError::Configuration(
                "missing environment variables: KIS_APP_KEY, KIS_APP_SECRET".into(),
            )
        })
    }

    pub fn require_source_db(&self) -> Result<&str> {
        self.source_db_path.as_deref().ok_or_else(|| {
            SyncError::Configuration("missing environment variable: SOURCE_DB_PATH".into())
        })
    }
}
