//! Grouping keys and document paths.
//!
//! Dates are plain calendar dates; no timezone conversion happens here.

use chrono::NaiveDate;

use crate::constants::{INSTRUMENTS_COLLECTION, MONTHLY_COLLECTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Bar,
    Dividend,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeriodKey {
    /// `("YYYY-MM", "DD")`, used for daily bars.
    Monthly { year_month: String, day: String },
    /// `("YYYY", "MM-DD")`, used for dividends.
    Yearly { year: String, month_day: String },
}

pub fn key_for(date: NaiveDate, granularity: Granularity) -> PeriodKey {
    match granularity {
        Granularity::Bar => {
            let (year_month, day) = monthly_key(date);
            PeriodKey::Monthly { year_month, day }
        }
        Granularity::Dividend => {
            let (year, month_day) = yearly_key(date);
            PeriodKey::Yearly { year, month_day }
        }
    }
}

/// `("YYYY-MM", "DD")`
pub fn monthly_key(date: NaiveDate) -> (String, String) {
    (date.format("%Y-%m").to_string(), date.format("%d").to_string())
}

/// `("YYYY", "MM-DD")`
pub fn yearly_key(date: NaiveDate) -> (String, String) {
    (date.format("%Y").to_string(), date.format("%m-%d").to_string())
}

pub fn instrument_path(code: &str) -> String {
    format!("{INSTRUMENTS_COLLECTION}/{code}")
}

pub fn monthly_path(code: &str, year_month: &str) -> String {
    format!("{INSTRUMENTS_COLLECTION}/{code}/{MONTHLY_COLLECTION}/{year_month}")
}

pub fn monthly_collection(code: &str) -> String {
    format!("{INSTRUMENTS_COLLECTION}/{code}/{MONTHLY_COLLECTION}")
}

pub fn user_line_path(user_id: &str, line_id: i64) -> String {
    format!("users/{user_id}/lines/line_{line_id}")
}
