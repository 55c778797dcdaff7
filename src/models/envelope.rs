// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::{
    error::{Error, Result},
    models::value::{self, Reply, Value},
};

/// One outbound protocol message.
///
/// On the wire an envelope is a BSON document with positional string
/// keys: `"0"` ticket, `"1"` command name, `"2"`/`"3"` command-specific
/// payload.
#[derive(Debug)]
pub enum Command<'a> {
    /// `"user pass"` or `"user pass db"`.
    Login { credentials: &'a str },
    Use { db: &'a str },
    Prepare { sql: &'a str },
    RunSql { sql: &'a str, args: Bson },
    RunPrepared { prepared: i64, args: Bson },
    Batch { prepared: i64, rows: Bson },
}

impl Command<'_> {
    pub fn into_doc(self, ticket: i64) -> Document {
        match self {
            Command::Login { credentials } => {
                doc! { "0": ticket, "1": "login", "2": credentials }
            },
            Command::Use { db } => doc! { "0": ticket, "1": "use", "2": db },
            Command::Prepare { sql } => doc! { "0": ticket, "1": "prepare", "2": sql },
            Command::RunSql { sql, args } => {
                doc! { "0": ticket, "1": "run", "2": sql, "3": args }
            },
            Command::RunPrepared { prepared, args } => {
                doc! { "0": ticket, "1": "run", "2": prepared, "3": args }
            },
            Command::Batch { prepared, rows } => {
                doc! { "0": ticket, "1": "batch", "2": prepared, "3": rows }
            },
        }
    }

    /// Serializes the envelope to the BSON bytes that go inside a frame.
    pub fn encode(self, ticket: i64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.into_doc(ticket)
            .to_writer(&mut buf)
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(buf)
    }
}

/// Parses a response frame into its ticket and payload.
pub fn parse_response(raw: &[u8]) -> Result<(i64, Reply)> {
    let doc = Document::from_reader(raw).map_err(|e| Error::Decode(e.to_string()))?;
    let ticket = match doc.get("0") {
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Int32(v)) => i64::from(*v),
        _ => return Err(Error::Decode("response carries no ticket".into())),
    };
    let reply = match doc.get("1") {
        Some(Bson::String(s)) => Reply::Scalar(Value::Text(s.clone())),
        Some(Bson::Int64(v)) => Reply::Scalar(Value::I64(*v)),
        Some(Bson::Int32(v)) => Reply::Scalar(Value::I64(i64::from(*v))),
        Some(Bson::Double(v)) => Reply::Scalar(Value::F64(*v)),
        Some(Bson::Boolean(v)) => Reply::Scalar(Value::Bool(*v)),
        Some(Bson::Null) => Reply::Scalar(Value::Null),
        Some(Bson::Array(rows)) => Reply::Rows(Arc::new(value::decode_rows(rows))),
        Some(other) => {
            return Err(Error::Decode(format!(
                "unsupported response payload: {other:?}"
            )));
        },
        None => return Err(Error::Decode("response carries no payload".into())),
    };
    Ok((ticket, reply))
}
