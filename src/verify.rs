//! Read-only summary of what the document store holds.

use serde_json::Value;

use crate::{
    constants::{INSTRUMENTS_COLLECTION, RUN_METADATA_PATH},
    period,
    store::documents::{DocumentStore, StoreError},
};

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSample {
    pub code: String,
    pub name: Option<String>,
    pub period: Option<String>,
    pub dividend_years: usize,
    pub monthly_documents: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub instrument_count: usize,
    pub sample: Option<InstrumentSample>,
    pub update_status: Option<String>,
    pub last_successful_update: Option<String>,
    pub last_attempted_update: Option<String>,
}

fn text(doc: &Value, field: &str) -> Option<String> {
    doc.get(field).and_then(Value::as_str).map(String::from)
}

pub fn verify<S: DocumentStore>(store: &S) -> Result<VerifyReport, StoreError> {
    let instruments = store.list(INSTRUMENTS_COLLECTION)?;

    let sample = match instruments.first() {
        None => None,
        Some((path, doc)) => {
            let code = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
            let monthly_documents = store.list(&period::monthly_collection(&code))?.len();
            Some(InstrumentSample {
                name: text(doc, "name"),
                period: text(doc, "period"),
                dividend_years: doc
                    .get("dividends")
                    .and_then(Value::as_object)
                    .map_or(0, |years| years.len()),
                monthly_documents,
                code,
            })
        }
    };

    let meta = store.get(RUN_METADATA_PATH)?.unwrap_or(Value::Null);
    Ok(VerifyReport {
        instrument_count: instruments.len(),
        sample,
        update_status: text(&meta, "updateStatus"),
        last_successful_update: text(&meta, "lastSuccessfulUpdate"),
        last_attempted_update: text(&meta, "lastAttemptedUpdate"),
    })
}

impl VerifyReport {
    pub fn log(&self) {
        log::info!("instruments: {}", self.instrument_count);
        match &self.sample {
            Some(sample) => {
                log::info!(
                    "sample {}: name={} period={}",
                    sample.code,
                    sample.name.as_deref().unwrap_or("-"),
                    sample.period.as_deref().unwrap_or("-")
                );
                log::info!(
                    "  dividend years: {}, monthly documents: {}",
                    sample.dividend_years,
                    sample.monthly_documents
                );
            }
            None => log::warn!("no instrument documents found"),
        }
        log::info!(
            "last run: status={} attempted={} succeeded={}",
            self.update_status.as_deref().unwrap_or("-"),
            self.last_attempted_update.as_deref().unwrap_or("-"),
            self.last_successful_update.as_deref().unwrap_or("never")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::documents::{Mutation, SqliteDocumentStore};
    use rusqlite::Connection;
    use serde_json::json;

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn empty_store() {
        let report = verify(&store()).unwrap();
        assert_eq!(report.instrument_count, 0);
        assert_eq!(report.sample, None);
        assert_eq!(report.update_status, None);
    }

    #[test]
    fn summarises_first_instrument_and_metadata() {
        let store = store();
        store
            .commit(&[
                Mutation::merge(
                    "instruments/005930",
                    json!({"name": "삼성전자", "period": "월말", "dividends": {"2023": {}, "2024": {}}}),
                ),
                Mutation::merge("instruments/005930/monthly/2025-01", json!({"days": {}})),
                Mutation::merge("instruments/005930/monthly/2025-02", json!({"days": {}})),
                Mutation::merge("instruments/000660/monthly/2025-01", json!({"days": {}})),
                Mutation::merge("instruments/035420", json!({"name": "NAVER"})),
                Mutation::merge(RUN_METADATA_PATH, json!({"updateStatus": "partial_failure"})),
            ])
            .unwrap();

        let report = verify(&store).unwrap();
        // 000660 only has monthly children, no document of its own
        assert_eq!(report.instrument_count, 2);
        let sample = report.sample.unwrap();
        assert_eq!(sample.code, "005930");
        assert_eq!(sample.name.as_deref(), Some("삼성전자"));
        assert_eq!(sample.dividend_years, 2);
        assert_eq!(sample.monthly_documents, 2);
        assert_eq!(report.update_status.as_deref(), Some("partial_failure"));
        assert_eq!(report.last_successful_update, None);
    }
}
