use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use crate::{
    model::{BarFields, Payload, SourceRecord},
    period::{self, Granularity, PeriodKey, key_for},
    store::documents::Mutation,
};

/// `yearMonth -> day -> bar`
pub type MonthlyBars = BTreeMap<String, BTreeMap<String, BarFields>>;
/// `year -> monthDay -> amount`
pub type DividendMap = BTreeMap<String, BTreeMap<String, u64>>;

/// Nested per-instrument view of everything folded so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccumulatedDocument {
    pub monthly: BTreeMap<String, MonthlyBars>,
    pub dividends: BTreeMap<String, DividendMap>,
    /// Top-level fields merged into `instruments/{code}`.
    pub fields: BTreeMap<String, Map<String, Value>>,
}

impl AccumulatedDocument {
    pub fn monthly_document_count(&self) -> usize {
        self.monthly.values().map(BTreeMap::len).sum()
    }

    pub fn day_count(&self) -> usize {
        self.monthly
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn dividend_count(&self) -> usize {
        self.dividends
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// One merge write per monthly document and one per instrument carrying
    /// dividends or fields. Only the leaves held here are touched in the store.
    pub fn to_mutations(&self) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(self.monthly_document_count() + self.dividends.len());

        for (code, months) in &self.monthly {
            for (year_month, days) in months {
                let days: Map<String, Value> = days
                    .iter()
                    .map(|(day, bar)| (day.clone(), bar_json(bar)))
                    .collect();
                mutations.push(
                    Mutation::merge(period::monthly_path(code, year_month), json!({ "days": days }))
                        .with_server_timestamp("updatedAt"),
                );
            }
        }

        let codes: BTreeSet<&String> = self.dividends.keys().chain(self.fields.keys()).collect();
        for code in codes {
            let mut data = self.fields.get(code).cloned().unwrap_or_default();
            if let Some(years) = self.dividends.get(code) {
                data.insert("dividends".to_string(), json!(years));
            }
            mutations.push(
                Mutation::merge(period::instrument_path(code), Value::Object(data))
                    .with_server_timestamp("updatedAt"),
            );
        }

        mutations
    }
}

pub fn bar_json(bar: &BarFields) -> Value {
    json!({
        "open": bar.open,
        "high": bar.high,
        "low": bar.low,
        "close": bar.close,
        "volume": bar.volume,
    })
}

/// Folds normalized records into an [`AccumulatedDocument`]. Input order
/// does not matter; a repeated `(code, date)` overwrites its leaf.
#[derive(Debug, Default)]
pub struct DocumentAccumulator {
    document: AccumulatedDocument,
}

impl DocumentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &SourceRecord) {
        let code = record.code.clone();
        match record.payload {
            Payload::Bar(bar) => {
                if let PeriodKey::Monthly { year_month, day } = key_for(record.date, Granularity::Bar) {
                    self.document
                        .monthly
                        .entry(code)
                        .or_default()
                        .entry(year_month)
                        .or_default()
                        .insert(day, bar);
                }
            }
            Payload::Dividend { amount } => {
                if let PeriodKey::Yearly { year, month_day } = key_for(record.date, Granularity::Dividend) {
                    self.document
                        .dividends
                        .entry(code)
                        .or_default()
                        .entry(year)
                        .or_default()
                        .insert(month_day, amount);
                }
            }
        }
    }

    /// Sets a top-level field on the instrument document, last write wins.
    pub fn set_field(&mut self, code: &str, field: &str, value: Value) {
        self.document
            .fields
            .entry(code.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn snapshot(&self) -> &AccumulatedDocument {
        &self.document
    }

    pub fn into_document(self) -> AccumulatedDocument {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(code: &str, date: &str, close: u64) -> SourceRecord {
        SourceRecord {
            code: code.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            payload: Payload::Bar(BarFields {
                open: close - 10,
                high: close + 20,
                low: close - 30,
                close,
                volume: 1000,
            }),
        }
    }

    fn dividend(code: &str, date: &str, amount: u64) -> SourceRecord {
        SourceRecord {
            code: code.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            payload: Payload::Dividend { amount },
        }
    }

    #[test]
    fn groups_bars_by_month_and_day() {
        let mut acc = DocumentAccumulator::new();
        acc.add(&bar("A", "2025-01-03", 105));
        acc.add(&bar("A", "2024-12-30", 90));
        acc.add(&bar("A", "2025-01-02", 100));

        let doc = acc.snapshot();
        let months = &doc.monthly["A"];
        assert_eq!(months.keys().collect::<Vec<_>>(), vec!["2024-12", "2025-01"]);
        assert_eq!(months["2025-01"]["02"].close, 100);
        assert_eq!(months["2025-01"]["03"].close, 105);
        assert_eq!(doc.monthly_document_count(), 2);
        assert_eq!(doc.day_count(), 3);
    }

    #[test]
    fn same_day_is_last_write_wins_not_summed() {
        let mut acc = DocumentAccumulator::new();
        acc.add(&bar("A", "2025-01-02", 100));
        acc.add(&bar("A", "2025-01-02", 100));
        assert_eq!(acc.snapshot().monthly["A"]["2025-01"]["02"].close, 100);

        acc.add(&bar("A", "2025-01-02", 120));
        assert_eq!(acc.snapshot().monthly["A"]["2025-01"]["02"].close, 120);
        assert_eq!(acc.snapshot().day_count(), 1);
    }

    #[test]
    fn dividends_nest_by_year() {
        let mut acc = DocumentAccumulator::new();
        acc.add(&dividend("A", "2025-01-24", 124));
        acc.add(&dividend("A", "2024-03-29", 361));
        acc.add(&dividend("A", "2024-06-28", 361));

        let doc = acc.into_document();
        assert_eq!(doc.dividends["A"]["2025"]["01-24"], 124);
        assert_eq!(doc.dividends["A"]["2024"].len(), 2);
        assert_eq!(doc.dividend_count(), 3);
    }

    #[test]
    fn mutations_are_merge_writes_per_document() {
        let mut acc = DocumentAccumulator::new();
        acc.add(&bar("A", "2025-01-02", 100));
        acc.add(&bar("A", "2025-02-03", 110));
        acc.add(&dividend("A", "2025-01-24", 124));

        let mutations = acc.snapshot().to_mutations();
        assert_eq!(mutations.len(), 3);
        assert!(mutations
            .iter()
            .all(|m| m.mode == crate::store::documents::WriteMode::Merge));
        assert_eq!(mutations[0].path, "instruments/A/monthly/2025-01");
        assert_eq!(mutations[0].data["days"]["02"]["close"], 100);
        assert_eq!(mutations[2].path, "instruments/A");
        assert_eq!(mutations[2].data["dividends"]["2025"]["01-24"], 124);
    }

    #[test]
    fn fields_share_the_instrument_write_with_dividends() {
        let mut acc = DocumentAccumulator::new();
        acc.add(&dividend("A", "2025-01-24", 124));
        acc.set_field("A", "name", json!("Alpha"));
        acc.set_field("B", "name", json!("Beta"));
        acc.set_field("B", "name", json!("Bravo"));

        let mutations = acc.snapshot().to_mutations();
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[0].path, "instruments/A");
        assert_eq!(mutations[0].data, json!({"name": "Alpha", "dividends": {"2025": {"01-24": 124}}}));
        assert_eq!(mutations[1].path, "instruments/B");
        assert_eq!(mutations[1].data, json!({"name": "Bravo"}));
        assert_eq!(mutations[1].server_timestamps, vec!["updatedAt".to_string()]);
    }
}
