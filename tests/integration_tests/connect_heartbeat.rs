// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::thread;

use anyhow::Result;
use bson::Document;
use tickdb_client_rs::{
    cfg::{logger::init_logger, settings::Settings},
    client::connection::Connection,
};

use crate::integration_tests::common::{
    ack, bind, command, read_envelope, read_frame, ticket, write_envelope, write_frame,
};

/// The server opens with a one-byte `'H'` heartbeat; the client must
/// answer with an empty frame (not another `'H'`) and stay usable.
#[test]
fn heartbeat_reply_is_an_empty_frame() -> Result<()> {
    init_logger();

    let (listener, addr) = bind()?;
    let server = thread::spawn(move || -> Result<()> {
        let (mut stream, _) = listener.accept()?;
        write_frame(&mut stream, b"H")?;

        // heartbeat reply and the `use` envelope may arrive in either
        // order; collect both
        let mut heartbeat_replied = false;
        let mut use_envelope: Option<Document> = None;
        while !heartbeat_replied || use_envelope.is_none() {
            let body = read_frame(&mut stream)?;
            if body.is_empty() {
                heartbeat_replied = true;
            } else {
                use_envelope = Some(Document::from_reader(body.as_slice())?);
            }
        }

        let envelope = use_envelope.expect("use envelope");
        assert_eq!(command(&envelope), "use");
        assert_eq!(envelope.get_str("2")?, "test");
        write_envelope(&mut stream, &ack(ticket(&envelope)))?;
        Ok(())
    });

    let conn = Connection::connect_with(Settings::from_addr(&addr)?.with_default_timeout(5))?;
    conn.use_db("test", true)?;
    assert!(conn.is_connected());
    conn.close();
    server.join().expect("server thread")?;
    Ok(())
}

/// Credentials configured up front are replayed as a blocking `login`
/// during `start`, with the database name appended to the argument.
#[test]
fn start_logs_in_with_configured_credentials() -> Result<()> {
    let (listener, addr) = bind()?;
    let server = thread::spawn(move || -> Result<()> {
        let (mut stream, _) = listener.accept()?;
        let login = read_envelope(&mut stream)?;
        assert_eq!(command(&login), "login");
        assert_eq!(login.get_str("2")?, "alice s3cret md");
        write_envelope(&mut stream, &ack(ticket(&login)))?;
        Ok(())
    });

    let settings = Settings::from_addr(&addr)?
        .with_default_timeout(5)
        .with_credentials("alice", "s3cret")
        .with_db("md");
    let conn = Connection::connect_with(settings)?;
    assert!(conn.is_connected());
    conn.close();
    server.join().expect("server thread")?;
    Ok(())
}
