//! Conversion between [`SqlValue`] and the PostgreSQL binary format.
//!
//! Statements are prepared before binding, so the server has already inferred
//! a type for every `$n`. [`PgParam`] adapts the bound value to that type, which
//! lets callers bind a text search value against an integer column.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::Row;

use crate::core::value::SqlValue;

type BoxError = Box<dyn Error + Sync + Send>;

/// A bound value encoded according to the parameter type the server inferred.
#[derive(Debug)]
pub(crate) struct PgParam<'a>(pub &'a SqlValue);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => as_bool(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::INT2 => {
                let v = as_int(value).ok_or_else(|| mismatch(value, ty))?;
                i16::try_from(v)?.to_sql(ty, out)
            }
            Type::INT4 => {
                let v = as_int(value).ok_or_else(|| mismatch(value, ty))?;
                i32::try_from(v)?.to_sql(ty, out)
            }
            Type::INT8 => as_int(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::FLOAT4 => {
                (as_float(value).ok_or_else(|| mismatch(value, ty))? as f32).to_sql(ty, out)
            }
            Type::FLOAT8 => as_float(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::NUMERIC => as_decimal(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::DATE => as_date(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::TIME => as_time(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::TIMESTAMP => as_datetime(value).ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
            Type::TIMESTAMPTZ => {
                let naive = as_datetime(value).ok_or_else(|| mismatch(value, ty))?;
                naive.and_utc().to_sql(ty, out)
            }
            Type::BYTEA => match value {
                SqlValue::Bytes(b) => b.as_slice().to_sql(ty, out),
                other => other.to_string().as_bytes().to_sql(ty, out),
            },
            _ => {
                // text-like and unknown types take the text rendering
                out.extend_from_slice(value.to_string().as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind '{}' as {}", value, ty).into()
}

fn as_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_int(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        SqlValue::Bool(b) => Some(i64::from(*b)),
        SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        SqlValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<Decimal>()
                    .ok()
                    .filter(|d| d.fract().is_zero())
                    .and_then(|d| d.to_i64())
            })
        }
        _ => None,
    }
}

fn as_float(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Text(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn as_decimal(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Decimal(d) => Some(*d),
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Bool(b) => Some(Decimal::from(i64::from(*b))),
        SqlValue::Float(f) => Decimal::try_from(*f).ok(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_date(value: &SqlValue) -> Option<NaiveDate> {
    match value {
        SqlValue::Date(d) => Some(*d),
        SqlValue::DateTime(dt) => Some(dt.date()),
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

fn as_time(value: &SqlValue) -> Option<NaiveTime> {
    match value {
        SqlValue::Time(t) => Some(*t),
        SqlValue::DateTime(dt) => Some(dt.time()),
        SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok(),
        _ => None,
    }
}

fn as_datetime(value: &SqlValue) -> Option<NaiveDateTime> {
    match value {
        SqlValue::DateTime(dt) => Some(*dt),
        SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
        SqlValue::Text(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// Raw column bytes for types without a dedicated decoder.
struct Raw(Vec<u8>);

impl<'a> FromSql<'a> for Raw {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Raw(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decode every column of a row.
pub(crate) fn decode_row(row: &Row) -> Vec<SqlValue> {
    (0..row.len()).map(|idx| decode_column(row, idx)).collect()
}

fn decode_column(row: &Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_().clone();
    match ty {
        Type::BOOL => get(row, idx, SqlValue::Bool),
        Type::INT2 => get(row, idx, |v: i16| SqlValue::Int(i64::from(v))),
        Type::INT4 => get(row, idx, |v: i32| SqlValue::Int(i64::from(v))),
        Type::INT8 => get(row, idx, SqlValue::Int),
        Type::OID => get(row, idx, |v: u32| SqlValue::Int(i64::from(v))),
        Type::FLOAT4 => get(row, idx, |v: f32| SqlValue::Float(f64::from(v))),
        Type::FLOAT8 => get(row, idx, SqlValue::Float),
        Type::NUMERIC => get(row, idx, SqlValue::Decimal),
        Type::DATE => get(row, idx, SqlValue::Date),
        Type::TIME => get(row, idx, SqlValue::Time),
        Type::TIMESTAMP => get(row, idx, SqlValue::DateTime),
        Type::TIMESTAMPTZ => get(row, idx, |v: DateTime<Utc>| SqlValue::DateTime(v.naive_utc())),
        Type::BYTEA => get(row, idx, SqlValue::Bytes),
        _ => get(row, idx, SqlValue::Text),
    }
}

fn get<'a, T, F>(row: &'a Row, idx: usize, wrap: F) -> SqlValue
where
    T: FromSql<'a>,
    F: FnOnce(T) -> SqlValue,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => SqlValue::Null,
        Err(_) => match row.try_get::<_, Option<Raw>>(idx) {
            Ok(Some(Raw(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => SqlValue::Text(text),
                Err(e) => SqlValue::Bytes(e.into_bytes()),
            },
            _ => SqlValue::Null,
        },
    }
}
