use std::time::Duration;

/// Hard ceiling on mutations in one atomic store batch.
pub const STORE_BATCH_LIMIT: usize = 500;

/// Default sub-batch size, kept below the store ceiling.
pub const DEFAULT_BATCH_SIZE: usize = 400;

/// Attempts per write or API call before the failure is recorded.
pub const MAX_ATTEMPTS: u32 = 3;

/// First backoff delay; doubles on every retry.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Timeout for calls to the brokerage API.
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of error messages kept for the run summary.
pub const MAX_SAMPLE_ERRORS: usize = 20;

// document store layout
pub const INSTRUMENTS_COLLECTION: &str = "instruments";
pub const MONTHLY_COLLECTION: &str = "monthly";
pub const RUN_METADATA_PATH: &str = "runMetadata/system";
pub const INSTRUMENT_CONFIG_PATH: &str = "config/instruments";

pub const DEFAULT_USER_ID: &str = "default_user";

/// Tables the relational source must contain before a migration.
pub const REQUIRED_SOURCE_TABLES: [&str; 5] =
    ["stock_info", "stock", "dividend", "horizontal", "data_time"];

/// Maps the legacy settlement period code to its display label.
pub fn period_label(code: &str) -> &str {
    match code {
        "End" => "월말",
        "Mid" => "월중",
        "Non" => "비해당",
        other => other,
    }
}

/// Maps the legacy numeric line style to its name.
pub fn line_style(style: i64) -> &'static str {
    match style {
        1 => "dashed",
        2 => "dotted",
        _ => "solid",
    }
}
