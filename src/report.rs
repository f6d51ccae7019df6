use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Asia::Seoul;
use serde::Serialize;
use serde_json::{Map, json};

use crate::{
    constants::{MAX_SAMPLE_ERRORS, RUN_METADATA_PATH},
    model::SyncError,
    store::documents::{DocumentStore, Mutation},
};

/// Result of processing one item (usually one instrument).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Something succeeded and nothing failed.
    Success,
    /// Some items failed, some succeeded.
    PartialFailure,
    /// Items were attempted and none succeeded.
    Failure,
    /// Nothing was attempted.
    NoWork,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failure => "failure",
            RunStatus::NoWork => "no_work",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub success_count: usize,
    pub error_count: usize,
    pub total_items: usize,
    /// The first few error messages; `error_count` keeps the real total.
    pub sample_errors: Vec<String>,
}

impl RunStats {
    pub fn status(&self) -> RunStatus {
        match (self.success_count, self.error_count) {
            (0, 0) => RunStatus::NoWork,
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failure,
            _ => RunStatus::PartialFailure,
        }
    }
}

/// Aggregates outcomes for one run and writes `runMetadata/system`.
pub struct RunReport {
    stats: RunStats,
    started: Instant,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            stats: RunStats::default(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.stats.total_items += 1;
        match outcome {
            Outcome::Success => self.stats.success_count += 1,
            Outcome::Failure(message) => {
                self.stats.error_count += 1;
                if self.stats.sample_errors.len() < MAX_SAMPLE_ERRORS {
                    self.stats.sample_errors.push(message);
                }
            }
        }
    }

    pub fn record_result<T>(&mut self, item: &str, result: &Result<T, SyncError>) {
        match result {
            Ok(_) => self.record(Outcome::Success),
            Err(err) => self.record(Outcome::Failure(format!("{item}: {err}"))),
        }
    }

    pub fn summary(&self) -> RunStats {
        self.stats.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.stats.status()
    }

    /// The metadata merge-write for this run. `lastSuccessfulUpdate` is only
    /// present for a clean run with at least one success.
    pub fn metadata_mutation(&self, attempted_at: DateTime<Utc>) -> Mutation {
        let stamp = attempted_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let status = self.status();
        let log_day = attempted_at.with_timezone(&Seoul).format("%Y-%m-%d").to_string();

        let mut update_log = Map::new();
        update_log.insert(
            log_day,
            json!({
                "success": status == RunStatus::Success,
                "timestamp": stamp,
                "stocksUpdated": self.stats.success_count,
                "durationSecs": self.started.elapsed().as_secs_f64(),
                "errors": self.stats.sample_errors,
            }),
        );

        let mut data = json!({
            "lastAttemptedUpdate": stamp,
            "updateStatus": status.as_str(),
            "lastRunStats": self.stats,
            "updateLog": update_log,
        });
        if status == RunStatus::Success {
            data["lastSuccessfulUpdate"] = json!(stamp);
        }
        Mutation::merge(RUN_METADATA_PATH, data)
    }

    /// Best effort: a failed write is logged and reported, never raised.
    pub fn persist<S: DocumentStore>(&self, store: &S, attempted_at: DateTime<Utc>) -> Option<SyncError> {
        match store.write(self.metadata_mutation(attempted_at)) {
            Ok(()) => None,
            Err(err) => {
                let err = SyncError::Persistence(err.to_string());
                log::error!("{err}");
                Some(err)
            }
        }
    }

    pub fn log_summary(&self) {
        let stats = &self.stats;
        log::info!(
            "run finished: status={} success={} errors={} total={} in {:.1}s",
            self.status().as_str(),
            stats.success_count,
            stats.error_count,
            stats.total_items,
            self.started.elapsed().as_secs_f64()
        );
        for error in &stats.sample_errors {
            log::warn!("  - {error}");
        }
        if stats.error_count > stats.sample_errors.len() {
            log::warn!(
                "  ... and {} more",
                stats.error_count - stats.sample_errors.len()
            );
        }
        if self.status() == RunStatus::Failure {
            log::error!("no item succeeded out of {} attempted", stats.total_items);
        }
    }
}
