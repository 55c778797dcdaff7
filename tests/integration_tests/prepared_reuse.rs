// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::thread;

use anyhow::Result;
use bson::bson;
use tickdb_client_rs::{
    cfg::settings::Settings,
    client::connection::Connection,
    models::value::Value,
};

use crate::integration_tests::common::{
    bind, command, prepared_reply, read_envelope, rows_reply, ticket, write_envelope,
};

/// Two executes of the same parameterized statement produce exactly one
/// `prepare` on the wire; both `run`s carry the same prepared id.
#[test]
fn same_sql_prepares_once() -> Result<()> {
    let (listener, addr) = bind()?;
    let server = thread::spawn(move || -> Result<u32> {
        let (mut stream, _) = listener.accept()?;
        let mut prepares = 0;
        let mut runs = 0;
        while runs < 2 {
            let envelope = read_envelope(&mut stream)?;
            match command(&envelope) {
                "prepare" => {
                    prepares += 1;
                    write_envelope(&mut stream, &prepared_reply(ticket(&envelope), 7))?;
                },
                "run" => {
                    runs += 1;
                    assert_eq!(envelope.get_i64("2")?, 7);
                    assert_eq!(envelope.get_array("3")?.len(), 1);
                    write_envelope(
                        &mut stream,
                        &rows_reply(ticket(&envelope), bson!([[runs as i64]])),
                    )?;
                },
                other => panic!("unexpected command {other}"),
            }
        }
        Ok(prepares)
    });

    let conn = Connection::connect_with(Settings::from_addr(&addr)?.with_default_timeout(5))?;
    let insert = "insert into t values(?)";
    conn.execute(insert, &[Value::I64(1)])?;
    let rows = conn.execute(insert, &[Value::I64(2)])?;
    assert_eq!(rows[0][0], Value::I64(2));
    conn.close();

    let prepares = server.join().expect("server thread")?;
    assert_eq!(prepares, 1, "second execute must hit the cache");
    Ok(())
}
