// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bson::{Bson, bson};
use chrono::DateTime;
use tickdb_client_rs::models::value::{self, Value};

#[test]
fn timestamp_keeps_nanoseconds() {
    let tm = DateTime::from_timestamp(1_700_000_000, 123_456_789).expect("valid instant");
    let encoded = Value::Timestamp(tm).to_bson();
    assert_eq!(
        encoded,
        bson!([1_700_000_000i64, 123_456_789i64]),
        "timestamp must encode as [seconds, nanoseconds]"
    );
    assert_eq!(Value::from_bson(&encoded), Value::Timestamp(tm));
}

#[test]
fn integer_widths_unify_on_read() {
    assert_eq!(Value::I32(-7).to_bson(), Bson::Int32(-7));
    assert_eq!(Value::from_bson(&Bson::Int32(-7)), Value::I64(-7));
    assert_eq!(Value::from_bson(&Bson::Int64(9)), Value::I64(9));

    // no unsigned 64-bit scalar on the wire
    assert_eq!(Value::U64(42).to_bson(), Bson::Int64(42));
    assert_eq!(Value::U32(42).to_bson(), Bson::Int64(42));
}

#[test]
fn floats_widen_on_read() {
    assert_eq!(Value::F32(2.5).to_bson(), Bson::Double(2.5));
    assert_eq!(Value::from_bson(&Bson::Double(2.5)), Value::F64(2.5));
}

#[test]
fn scalar_round_trips() {
    for value in [
        Value::Bool(true),
        Value::Null,
        Value::Text("mid px".to_string()),
        Value::I64(i64::MIN),
        Value::F64(-0.25),
    ] {
        let decoded = Value::from_bson(&value.to_bson());
        assert_eq!(decoded, value);
    }
}

#[test]
fn unknown_bson_decodes_as_null() {
    assert_eq!(Value::from_bson(&bson!({ "k": 1 })), Value::Null);
    // a two-element array qualifies as a timestamp only when both
    // elements are integers
    assert_eq!(Value::from_bson(&bson!([1i64, "x"])), Value::Null);
    assert_eq!(Value::from_bson(&bson!([1i64, 2i64, 3i64])), Value::Null);
}

#[test]
fn args_encode_as_array() {
    let tm = DateTime::from_timestamp(100, 5).expect("valid instant");
    let args = [Value::I64(1), Value::Timestamp(tm), Value::Null];
    assert_eq!(
        value::encode_args(&args),
        bson!([1i64, [100i64, 5i64], null])
    );
}

#[test]
fn rows_decode_cell_by_cell() {
    let raw = bson!([[1i64, "a", true], [2i64, "b", false]]);
    let Bson::Array(rows) = raw else { unreachable!() };
    let decoded = value::decode_rows(&rows);
    assert_eq!(decoded.len(), 2);
    assert_eq!(
        decoded[0],
        vec![
            Value::I64(1),
            Value::Text("a".to_string()),
            Value::Bool(true)
        ]
    );
}

#[test]
fn scalar_row_element_becomes_single_cell_row() {
    let Bson::Array(rows) = bson!([7i64]) else {
        unreachable!()
    };
    assert_eq!(value::decode_rows(&rows), vec![vec![Value::I64(7)]]);
}
