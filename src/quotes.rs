use chrono::Utc;
use serde_json::json;

use crate::{
    accumulator::DocumentAccumulator,
    cancel::CancelFlag,
    dispatcher::UpsertDispatcher,
    kis::api_caller::QuoteSource,
    model::{self, Payload, SyncError},
    normalize,
    report::{Outcome, RunReport},
    retry::RetryPolicy,
    store::documents::DocumentStore,
};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

/// Pulls the latest daily bar for every instrument and merges it into the
/// store. One instrument failing never stops the others; the returned report
/// has already been persisted.
pub async fn pull_and_save<Q: QuoteSource, S: DocumentStore>(
    source: &Q,
    store: &S,
    instruments: &[String],
    options: RunOptions,
    cancel: &CancelFlag,
) -> RunReport {
    let mut report = RunReport::new();
    let attempted_at = Utc::now();

    let token = options
        .retry
        .run("authenticate", || source.authenticate())
        .await
        .map_err(SyncError::from);
    let token = match token {
        Ok(token) => token,
        Err(err) => {
            log::error!("authentication failed: {err}");
            for code in instruments {
                report.record(Outcome::Failure(format!("{code}: authentication failed: {err}")));
            }
            report.log_summary();
            report.persist(store, attempted_at);
            return report;
        }
    };

    let dispatcher = UpsertDispatcher::new(store, options.batch_size).with_retry(options.retry);
    let total = instruments.len();
    log::info!("fetching {total} instruments, sub-batches of {}", dispatcher.batch_size());

    for (idx, code) in instruments.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("run cancelled with {} of {total} instruments left", total - idx);
            break;
        }
        log::info!("[{}/{total}] {code}", idx + 1);

        let result = pull_instrument(source, &dispatcher, &options.retry, code, &token).await;
        match &result {
            Ok(()) => log::info!("Successfully fetched and saved latest bar for {code}"),
            Err(err) => log::error!("{code}: {err}"),
        }
        report.record_result(code, &result);
    }

    report.log_summary();
    report.persist(store, attempted_at);
    report
}

async fn pull_instrument<Q: QuoteSource, S: DocumentStore>(
    source: &Q,
    dispatcher: &UpsertDispatcher<'_, S>,
    retry: &RetryPolicy,
    code: &str,
    token: &str,
) -> model::Result<()> {
    let raw = retry
        .run(&format!("{code}: fetch latest bar"), || source.latest_bar(code, token))
        .await?
        .ok_or_else(|| SyncError::TerminalApi(format!("no daily data for {code}")))?;

    let record = normalize::normalize(&raw)?;
    let mut accumulator = DocumentAccumulator::new();
    accumulator.add(&record);
    if let Payload::Bar(bar) = record.payload {
        accumulator.set_field(
            &record.code,
            "latest",
            json!({
                "date": record.date.format("%Y-%m-%d").to_string(),
                "close": bar.close,
                "volume": bar.volume,
            }),
        );
    }

    let result = dispatcher.flush(accumulator.snapshot()).await;
    if !result.is_success() {
        return Err(SyncError::Store(result.errors.join("; ")));
    }
    Ok(())
}
