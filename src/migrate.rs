//! One-time bulk copy of the relational history into the document store.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;

use crate::{
    accumulator::DocumentAccumulator,
    cancel::CancelFlag,
    constants::{RUN_METADATA_PATH, line_style, period_label},
    dispatcher::UpsertDispatcher,
    model::{self, InstrumentInfo, SyncError},
    normalize, period,
    quotes::RunOptions,
    report::RunReport,
    store::{
        documents::{DocumentStore, Mutation},
        source::SourceDb,
    },
};

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub default_user_id: String,
    pub run: RunOptions,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationTally {
    pub instruments_listed: usize,
    pub instruments_migrated: usize,
    pub monthly_documents: usize,
    pub daily_records: usize,
    pub dividends: usize,
    pub skipped_records: usize,
    pub lines_migrated: usize,
    pub instruments_timestamped: usize,
}

impl MigrationTally {
    pub fn log(&self) {
        log::info!(
            "Instruments migrated: {} of {}",
            self.instruments_migrated,
            self.instruments_listed
        );
        log::info!("Monthly documents written: {}", self.monthly_documents);
        log::info!("Daily records: {}", self.daily_records);
        log::info!("Dividends: {}", self.dividends);
        log::info!("Horizontal lines: {}", self.lines_migrated);
        log::info!("Instrument data timestamps: {}", self.instruments_timestamped);
        if self.skipped_records > 0 {
            log::warn!("Records skipped by validation: {}", self.skipped_records);
        }
    }
}

/// Offset of the chunk after this one, if a full chunk was listed.
pub fn next_chunk_offset(limit: Option<u32>, offset: Option<u32>, listed: usize) -> Option<u32> {
    let limit = limit?;
    if listed < limit as usize {
        return None;
    }
    offset.unwrap_or(0).checked_add(limit)
}

/// Migrates instruments (identity, dividends, monthly bars) one at a time,
/// then chart lines and data timestamps. Each of those steps counts as one
/// item of the run. Only a failure to list the instruments aborts the run.
pub async fn migrate<S: DocumentStore>(
    source: &SourceDb,
    store: &S,
    options: &MigrationOptions,
    cancel: &CancelFlag,
) -> model::Result<(RunReport, MigrationTally)> {
    let attempted_at = Utc::now();
    let infos = source.fetch_stock_info(options.limit, options.offset)?;

    let dispatcher = UpsertDispatcher::new(store, options.run.batch_size).with_retry(options.run.retry);
    let mut report = RunReport::new();
    let mut tally = MigrationTally {
        instruments_listed: infos.len(),
        ..MigrationTally::default()
    };
    let total = infos.len();
    log::info!("Migrating {total} instruments, sub-batches of {}", dispatcher.batch_size());

    for (idx, info) in infos.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("migration cancelled with {} of {total} instruments left", total - idx);
            break;
        }
        log::info!("[{}/{total}] {} - {}", idx + 1, info.code, info.name);

        let result = migrate_instrument(source, &dispatcher, info, &mut tally).await;
        match &result {
            Ok(()) => tally.instruments_migrated += 1,
            Err(err) => log::error!("Error migrating {}: {err}", info.code),
        }
        report.record_result(&info.code, &result);
    }

    if !cancel.is_cancelled() {
        let (written, result) = migrate_lines(source, &dispatcher, &options.default_user_id).await;
        tally.lines_migrated = written;
        if let Err(err) = &result {
            log::error!("Error migrating horizontal lines: {err}");
        }
        report.record_result("horizontal lines", &result);

        let result = migrate_data_times(source, &dispatcher).await;
        match &result {
            Ok(count) => tally.instruments_timestamped = *count,
            Err(err) => log::error!("Error migrating data timestamps: {err}"),
        }
        report.record_result("data timestamps", &result);
    }

    tally.log();
    report.log_summary();
    report.persist(store, attempted_at);
    Ok((report, tally))
}

async fn migrate_instrument<S: DocumentStore>(
    source: &SourceDb,
    dispatcher: &UpsertDispatcher<'_, S>,
    info: &InstrumentInfo,
    tally: &mut MigrationTally,
) -> model::Result<()> {
    let mut rows = source.dividend_rows(&info.code)?;
    rows.extend(source.daily_rows(&info.code)?);

    let mut accumulator = DocumentAccumulator::new();
    accumulator.set_field(&info.code, "code", json!(info.code));
    accumulator.set_field(&info.code, "name", json!(info.name));
    accumulator.set_field(&info.code, "period", json!(period_label(&info.period)));

    let mut skipped = 0;
    for raw in &rows {
        match normalize::normalize(raw) {
            Ok(record) => accumulator.add(&record),
            Err(err) => {
                log::warn!("{}: skipping record: {err}", info.code);
                skipped += 1;
            }
        }
    }
    let document = accumulator.into_document();

    let result = dispatcher.flush(&document).await;
    tally.skipped_records += skipped;
    if !result.is_success() {
        return Err(SyncError::Store(result.errors.join("; ")));
    }

    tally.monthly_documents += document.monthly_document_count();
    tally.daily_records += document.day_count();
    tally.dividends += document.dividend_count();
    log::info!(
        "      {} monthly documents ({} daily records), {} dividends",
        document.monthly_document_count(),
        document.day_count(),
        document.dividend_count()
    );
    Ok(())
}

/// Returns the number of lines written even when a later sub-batch failed.
async fn migrate_lines<S: DocumentStore>(
    source: &SourceDb,
    dispatcher: &UpsertDispatcher<'_, S>,
    user_id: &str,
) -> (usize, model::Result<()>) {
    let lines = match source.horizontal_lines() {
        Ok(lines) => lines,
        Err(err) => return (0, Err(err.into())),
    };
    if lines.is_empty() {
        log::info!("No horizontal lines to migrate");
        return (0, Ok(()));
    }

    let mutations: Vec<Mutation> = lines
        .iter()
        .map(|line| {
            Mutation::replace(
                period::user_line_path(user_id, line.id),
                json!({
                    "stockCode": line.stock_code,
                    "price": line.price,
                    "color": line.color,
                    "style": line_style(line.line_style),
                    "width": line.line_width,
                    "memo": line.memo,
                    "createdAt": line.created_at,
                    "updatedAt": line.updated_at,
                }),
            )
        })
        .collect();

    let result = dispatcher.dispatch(&mutations).await;
    if !result.is_success() {
        return (
            result.mutations_written,
            Err(SyncError::Store(result.errors.join("; "))),
        );
    }
    (result.mutations_written, Ok(()))
}

async fn migrate_data_times<S: DocumentStore>(
    source: &SourceDb,
    dispatcher: &UpsertDispatcher<'_, S>,
) -> model::Result<usize> {
    let times = source.data_times()?;
    if times.is_empty() {
        return Ok(0);
    }
    let latest = times.iter().map(|(_, time)| time).max().cloned();
    let stocks: BTreeMap<String, String> = times.into_iter().collect();

    let mutation = Mutation::merge(
        RUN_METADATA_PATH,
        json!({ "stocks": stocks, "lastUpdate": latest }),
    );
    let result = dispatcher.dispatch(std::slice::from_ref(&mutation)).await;
    if !result.is_success() {
        return Err(SyncError::Store(result.errors.join("; ")));
    }
    Ok(stocks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        report::RunStatus,
        retry::RetryPolicy,
        store::{
            documents::{self, SqliteDocumentStore, StoreError},
            source::fixtures,
        },
    };
    use rusqlite::Connection;
    use serde_json::Value;
    use std::time::Duration;

    /// Refuses every batch that writes under `rejected`.
    struct RejectingStore {
        inner: SqliteDocumentStore,
        rejected: &'static str,
    }

    impl RejectingStore {
        fn new(rejected: &'static str) -> Self {
            Self {
                inner: store(),
                rejected,
            }
        }
    }

    impl DocumentStore for RejectingStore {
        fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(path)
        }

        fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
            self.inner.list(collection)
        }

        fn commit(&self, batch: &[Mutation]) -> Result<(), StoreError> {
            if batch.iter().any(|m| m.path.starts_with(self.rejected)) {
                return Err(documents::fixtures::sqlite_error(rusqlite::ffi::SQLITE_READONLY));
            }
            self.inner.commit(batch)
        }
    }

    fn options(limit: Option<u32>, offset: Option<u32>) -> MigrationOptions {
        MigrationOptions {
            limit,
            offset,
            default_user_id: "u1".into(),
            run: RunOptions {
                batch_size: 2,
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(1),
                },
            },
        }
    }

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn migrates_full_history() {
        let source = SourceDb::new(fixtures::legacy_db());
        let store = store();
        let (report, tally) = migrate(&source, &store, &options(None, None), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.status(), RunStatus::Success);
        // three instruments, the lines and the data timestamps
        assert_eq!(report.summary().total_items, 5);
        assert_eq!(tally.instruments_listed, 3);
        assert_eq!(tally.instruments_migrated, 3);
        assert_eq!(tally.daily_records, 4);
        assert_eq!(tally.skipped_records, 1);
        assert_eq!(tally.dividends, 2);
        assert_eq!(tally.lines_migrated, 2);
        assert_eq!(tally.instruments_timestamped, 2);

        let samsung = store.get("instruments/005930").unwrap().unwrap();
        assert_eq!(samsung["name"], "삼성전자");
        assert_eq!(samsung["period"], "월말");
        assert_eq!(samsung["dividends"]["2024"]["03-29"], 361);
        assert_eq!(samsung["dividends"]["2025"]["01-24"], 124);

        let january = store.get("instruments/005930/monthly/2025-01").unwrap().unwrap();
        assert_eq!(january["days"]["02"]["close"], 53400);
        assert_eq!(january["days"]["03"]["close"], 54400);
        assert_eq!(store.list("instruments/005930/monthly").unwrap().len(), 2);

        let line = store.get("users/u1/lines/line_2").unwrap().unwrap();
        assert_eq!(line["style"], "dashed");
        assert_eq!(line["price"], 55000.5);

        let meta = store.get(RUN_METADATA_PATH).unwrap().unwrap();
        assert_eq!(meta["stocks"]["005930"], "2025-02-03 15:40:00");
        assert_eq!(meta["lastUpdate"], "2025-02-03 15:40:00");
        assert_eq!(meta["updateStatus"], "success");
    }

    #[tokio::test]
    async fn migrating_twice_keeps_documents_identical() {
        let source = SourceDb::new(fixtures::legacy_db());
        let store = store();
        let days = |store: &SqliteDocumentStore| {
            store.get("instruments/005930/monthly/2025-01").unwrap().unwrap()["days"].clone()
        };

        migrate(&source, &store, &options(None, None), &CancelFlag::new()).await.unwrap();
        let first = days(&store);
        migrate(&source, &store, &options(None, None), &CancelFlag::new()).await.unwrap();
        assert_eq!(days(&store), first);
    }

    #[tokio::test]
    async fn chunked_run_touches_only_its_slice() {
        let source = SourceDb::new(fixtures::legacy_db());
        let store = store();
        let (report, tally) = migrate(&source, &store, &options(Some(1), Some(1)), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(tally.instruments_listed, 1);
        assert_eq!(report.summary().total_items, 3);
        assert!(store.get("instruments/005930").unwrap().is_some());
        assert!(store.get("instruments/000660").unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_tables_abort_before_writes() {
        let source = SourceDb::new(Connection::open_in_memory().unwrap());
        let store = store();
        let err = migrate(&source, &store, &options(None, None), &CancelFlag::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Database(_)));
        assert!(store.get(RUN_METADATA_PATH).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_line_migration_is_counted() {
        let source = SourceDb::new(fixtures::legacy_db());
        let store = RejectingStore::new("users/");
        let (report, tally) = migrate(&source, &store, &options(None, None), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.status(), RunStatus::PartialFailure);
        let stats = report.summary();
        assert_eq!(stats.error_count, 1);
        assert!(stats.sample_errors[0].starts_with("horizontal lines:"));
        assert_eq!(tally.instruments_migrated, 3);
        assert_eq!(tally.lines_migrated, 0);

        let meta = store.get(RUN_METADATA_PATH).unwrap().unwrap();
        assert_eq!(meta["updateStatus"], "partial_failure");
        assert!(meta.get("lastSuccessfulUpdate").is_none());
    }

    #[tokio::test]
    async fn lines_committed_before_a_failed_batch_are_tallied() {
        let source = SourceDb::new(fixtures::legacy_db());
        let store = RejectingStore::new("users/u1/lines/line_2");
        let mut options = options(None, None);
        options.run.batch_size = 1;

        let (report, tally) = migrate(&source, &store, &options, &CancelFlag::new()).await.unwrap();
        assert_eq!(tally.lines_migrated, 1);
        assert_eq!(report.summary().error_count, 1);
        assert!(store.get("users/u1/lines/line_1").unwrap().is_some());
        assert!(store.get("users/u1/lines/line_2").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_data_timestamps_are_counted() {
        let source = SourceDb::new(fixtures::legacy_db());
        // the closing status write is refused as well and only logged
        let store = RejectingStore::new(RUN_METADATA_PATH);
        let (report, tally) = migrate(&source, &store, &options(None, None), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(tally.instruments_timestamped, 0);
        assert_eq!(report.status(), RunStatus::PartialFailure);
        assert!(report.summary().sample_errors[0].starts_with("data timestamps:"));
    }

    #[test]
    fn next_chunk_only_after_a_full_chunk() {
        assert_eq!(next_chunk_offset(Some(50), Some(100), 50), Some(150));
        assert_eq!(next_chunk_offset(Some(50), None, 50), Some(50));
        assert_eq!(next_chunk_offset(Some(50), Some(100), 12), None);
        assert_eq!(next_chunk_offset(None, Some(100), 50), None);
        assert_eq!(next_chunk_offset(Some(u32::MAX), Some(u32::MAX), u32::MAX as usize), None);
    }
}
