//! Read side of the legacy relational database.

use rusqlite::{Connection, Result, Row, params, types::Value};

use crate::{
    model::{HorizontalLine, InstrumentInfo},
    normalize::{RawPayload, RawRow, RawValue},
};

use super::sqlite;

pub struct SourceDb {
    conn: Connection,
}

fn raw_value(value: Value) -> RawValue {
    match value {
        Value::Null => RawValue::Null,
        Value::Integer(v) => RawValue::Integer(v),
        Value::Real(v) => RawValue::Real(v),
        Value::Text(v) => RawValue::Text(v),
        Value::Blob(v) => RawValue::Text(String::from_utf8_lossy(&v).into_owned()),
    }
}

fn column(row: &Row<'_>, idx: usize) -> Result<RawValue> {
    Ok(raw_value(row.get::<_, Value>(idx)?))
}

fn text_column(row: &Row<'_>, idx: usize) -> Result<Option<String>> {
    Ok(match raw_value(row.get::<_, Value>(idx)?) {
        RawValue::Null => None,
        other => Some(other.to_string()),
    })
}

impl SourceDb {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(sqlite::open_read_only(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect()
    }

    /// Instruments ordered by code, optionally one chunk of them.
    pub fn fetch_stock_info(&self, limit: Option<u32>, offset: Option<u32>) -> Result<Vec<InstrumentInfo>> {
        // a negative LIMIT means no limit in SQLite
        let limit = limit.map(i64::from).unwrap_or(-1);
        let offset = offset.map(i64::from).unwrap_or(0);
        let mut stmt = self
            .conn
            .prepare("SELECT Code, Name, Period FROM stock_info ORDER BY Code LIMIT ?1 OFFSET ?2")?;
        let infos = stmt.query_map(params![limit, offset], |row| {
            Ok(InstrumentInfo {
                code: text_column(row, 0)?.unwrap_or_default(),
                name: text_column(row, 1)?.unwrap_or_default(),
                period: text_column(row, 2)?.unwrap_or_default(),
            })
        })?;
        infos.collect()
    }

    pub fn daily_rows(&self, code: &str) -> Result<Vec<RawRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT Date, Open, High, Low, Close, Volume
             FROM stock WHERE Code = ?1 ORDER BY Date",
        )?;
        let rows = stmt.query_map(params![code], |row| {
            Ok(RawRow {
                code: code.to_string(),
                date: column(row, 0)?,
                payload: RawPayload::Bar {
                    open: column(row, 1)?,
                    high: column(row, 2)?,
                    low: column(row, 3)?,
                    close: column(row, 4)?,
                    volume: column(row, 5)?,
                },
            })
        })?;
        rows.collect()
    }

    pub fn dividend_rows(&self, code: &str) -> Result<Vec<RawRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Date, Price FROM dividend WHERE Code = ?1 ORDER BY Date")?;
        let rows = stmt.query_map(params![code], |row| {
            Ok(RawRow {
                code: code.to_string(),
                date: column(row, 0)?,
                payload: RawPayload::Dividend {
                    amount: column(row, 1)?,
                },
            })
        })?;
        rows.collect()
    }

    pub fn horizontal_lines(&self) -> Result<Vec<HorizontalLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, color, created_at, line_style, line_width, memo, price, stock_code, updated_at
             FROM horizontal ORDER BY id",
        )?;
        let lines = stmt.query_map([], |row| {
            Ok(HorizontalLine {
                id: row.get(0)?,
                color: text_column(row, 1)?.unwrap_or_default(),
                created_at: text_column(row, 2)?,
                line_style: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                line_width: row.get::<_, Option<i64>>(4)?.unwrap_or(1),
                memo: text_column(row, 5)?,
                price: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                stock_code: text_column(row, 7)?.unwrap_or_default(),
                updated_at: text_column(row, 8)?,
            })
        })?;
        lines.collect()
    }

    /// `(code, last data time)` pairs.
    pub fn data_times(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT Code, Time FROM data_time ORDER BY Code")?;
        let times = stmt.query_map([], |row| {
            Ok((
                text_column(row, 0)?.unwrap_or_default(),
                text_column(row, 1)?.unwrap_or_default(),
            ))
        })?;
        times.collect()
    }
}
