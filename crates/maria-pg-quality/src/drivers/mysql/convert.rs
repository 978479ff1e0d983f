//! Conversion between [`SqlValue`] and `mysql_async::Value`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::{Column, Value};
use rust_decimal::Decimal;

use crate::core::value::SqlValue;

/// Binary charset id; columns with it carry raw bytes.
const BINARY_CHARSET: u16 = 63;

/// The parts of a result column that decide how its values are decoded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnShape {
    pub column_type: ColumnType,
    /// `tinyint(1)`
    pub boolean: bool,
    pub binary: bool,
}

impl ColumnShape {
    pub fn of(column: &Column) -> Self {
        let column_type = column.column_type();
        Self {
            column_type,
            boolean: column_type == ColumnType::MYSQL_TYPE_TINY
                && column.column_length() == 1
                && !column.flags().contains(ColumnFlags::UNSIGNED_FLAG),
            binary: column.character_set() == BINARY_CHARSET,
        }
    }
}

/// Convert a bound value to its MariaDB wire value.
pub(crate) fn to_mysql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::Int(i) => Value::Int(*i),
        SqlValue::Float(f) => Value::Double(*f),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        SqlValue::DateTime(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
    }
}

/// Decode a result value.
///
/// Binary-protocol rows arrive typed; text-protocol rows arrive as bytes and
/// are parsed according to the column type.
pub(crate) fn from_mysql_value(value: &Value, shape: ColumnShape) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) if shape.boolean => SqlValue::Bool(*i != 0),
        Value::Int(i) => SqlValue::Int(*i),
        Value::UInt(u) => i64::try_from(*u)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(*u))),
        Value::Float(f) => SqlValue::Float(f64::from(*f)),
        Value::Double(d) => SqlValue::Float(*d),
        Value::Date(y, m, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d));
            let time = NaiveTime::from_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us);
            match (date, time, shape.column_type) {
                (Some(date), _, ColumnType::MYSQL_TYPE_DATE) => SqlValue::Date(date),
                (Some(date), Some(time), _) => SqlValue::DateTime(NaiveDateTime::new(date, time)),
                // zero dates such as 0000-00-00
                _ => SqlValue::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, m, d, h, mi, s
                )),
            }
        }
        Value::Time(negative, days, h, m, s, us) => {
            match NaiveTime::from_hms_micro_opt(u32::from(*h), u32::from(*m), u32::from(*s), *us) {
                Some(time) if !negative && *days == 0 => SqlValue::Time(time),
                _ => {
                    let hours = u64::from(*days) * 24 + u64::from(*h);
                    let sign = if *negative { "-" } else { "" };
                    SqlValue::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, m, s))
                }
            }
        }
        Value::Bytes(bytes) => decode_bytes(bytes, shape),
    }
}

fn decode_bytes(bytes: &[u8], shape: ColumnShape) -> SqlValue {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) if !shape.binary => text,
        _ => return SqlValue::Bytes(bytes.to_vec()),
    };

    let parsed = match shape.column_type {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            text.parse::<Decimal>().ok().map(SqlValue::Decimal)
        }
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text.parse::<i64>().ok().map(|i| {
            if shape.boolean {
                SqlValue::Bool(i != 0)
            } else {
                SqlValue::Int(i)
            }
        }),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse::<f64>().ok().map(SqlValue::Float)
        }
        ColumnType::MYSQL_TYPE_DATE => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(SqlValue::DateTime)
        }
        _ => None,
    };

    parsed.unwrap_or_else(|| SqlValue::Text(text.to_string()))
}
