// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use bson::Bson;
use chrono::{DateTime, Utc};

/// One scalar cell of a result row or a statement argument.
///
/// The write side keeps the full width spectrum; the read side unifies
/// every integer on `I64` and every float on `F64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    U64(u64),
    I32(i32),
    U32(u32),
    Bool(bool),
    F32(f32),
    F64(f64),
    Null,
    Text(String),
    /// Wall-clock instant, nanosecond resolution preserved end to end.
    Timestamp(DateTime<Utc>),
}

pub type Row = Vec<Value>;
pub type Rows = Vec<Row>;

/// Result rows are shared between the registry and the caller once
/// delivered and never mutated after publish.
pub type ResultSet = Arc<Rows>;

/// One decoded response payload: a scalar (acks, prepared ids, error
/// text) or a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Scalar(Value),
    Rows(ResultSet),
}

impl Value {
    /// Encodes the scalar into its wire form. Total over every variant.
    ///
    /// BSON has no unsigned 64-bit scalar, so `U64` travels as `Int64`;
    /// `F32` widens to `Double`. A timestamp becomes the two-element
    /// array `[seconds, nanoseconds]`, both `Int64`.
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::I64(v) => Bson::Int64(*v),
            Value::U64(v) => Bson::Int64(*v as i64),
            Value::I32(v) => Bson::Int32(*v),
            Value::U32(v) => Bson::Int64(i64::from(*v)),
            Value::Bool(v) => Bson::Boolean(*v),
            Value::F32(v) => Bson::Double(f64::from(*v)),
            Value::F64(v) => Bson::Double(*v),
            Value::Null => Bson::Null,
            Value::Text(v) => Bson::String(v.clone()),
            Value::Timestamp(tm) => Bson::Array(vec![
                Bson::Int64(tm.timestamp()),
                Bson::Int64(i64::from(tm.timestamp_subsec_nanos())),
            ]),
        }
    }

    /// Decodes one row field by inspecting the BSON type.
    ///
    /// Integer widths unify on `I64`, floats on `F64`; a two-element
    /// all-integer array is a timestamp; anything else decodes as
    /// `Null`.
    pub fn from_bson(raw: &Bson) -> Value {
        match raw {
            Bson::String(s) => Value::Text(s.clone()),
            Bson::Int64(v) => Value::I64(*v),
            Bson::Int32(v) => Value::I64(i64::from(*v)),
            Bson::Double(v) => Value::F64(*v),
            Bson::Boolean(v) => Value::Bool(*v),
            Bson::Array(parts) if parts.len() == 2 => {
                match (as_int(&parts[0]), as_int(&parts[1])) {
                    (Some(sec), Some(nsec)) => timestamp(sec, nsec),
                    _ => Value::Null,
                }
            },
            _ => Value::Null,
        }
    }
}

fn as_int(raw: &Bson) -> Option<i64> {
    match raw {
        Bson::Int64(v) => Some(*v),
        Bson::Int32(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn timestamp(sec: i64, nsec: i64) -> Value {
    u32::try_from(nsec)
        .ok()
        .and_then(|nsec| DateTime::from_timestamp(sec, nsec))
        .map_or(Value::Null, Value::Timestamp)
}

/// Encodes one caller-supplied argument list as a BSON array.
pub fn encode_args(args: &[Value]) -> Bson {
    Bson::Array(args.iter().map(Value::to_bson).collect())
}

/// Decodes the array-of-arrays payload of a tabular response.
///
/// A scalar element where a row is expected is kept as a single-cell
/// row rather than dropped.
pub fn decode_rows(raw: &[Bson]) -> Rows {
    raw.iter()
        .map(|row| match row {
            Bson::Array(cells) => cells.iter().map(Value::from_bson).collect(),
            other => vec![Value::from_bson(other)],
        })
        .collect()
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}
