// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tickdb_client_rs::{
    cfg::settings::{DEFAULT_PORT, Settings},
    error::Error,
};

#[test]
fn bare_host_gets_default_port() -> Result<()> {
    let settings = Settings::from_addr("ticks.example.com")?;
    assert_eq!(settings.host, "ticks.example.com");
    assert_eq!(settings.port, DEFAULT_PORT);
    assert!(settings.username.is_empty());
    assert!(settings.db.is_empty());
    Ok(())
}

#[test]
fn host_with_port() -> Result<()> {
    let settings = Settings::from_addr("10.0.0.5:2345")?;
    assert_eq!(settings.host, "10.0.0.5");
    assert_eq!(settings.port, 2345);
    Ok(())
}

#[test]
fn credentials_and_db() -> Result<()> {
    let settings = Settings::from_addr("alice:s3cret@ticks:1200/md")?;
    assert_eq!(settings.username, "alice");
    assert_eq!(settings.password, "s3cret");
    assert_eq!(settings.host, "ticks");
    assert_eq!(settings.port, 1200);
    assert_eq!(settings.db, "md");
    Ok(())
}

#[test]
fn username_without_password() -> Result<()> {
    let settings = Settings::from_addr("alice@ticks:1200")?;
    assert_eq!(settings.username, "alice");
    assert!(settings.password.is_empty());
    assert_eq!(settings.host, "ticks");
    Ok(())
}

#[test]
fn host_with_db_only() -> Result<()> {
    let settings = Settings::from_addr("ticks/md")?;
    assert_eq!(settings.host, "ticks");
    assert_eq!(settings.port, DEFAULT_PORT);
    assert_eq!(settings.db, "md");
    Ok(())
}

#[test]
fn setters_override_parsed_components() -> Result<()> {
    let settings = Settings::from_addr("alice:s3cret@ticks:1200/md")?
        .with_port(4000)
        .with_db("other")
        .with_credentials("bob", "hunter2");
    assert_eq!(settings.port, 4000);
    assert_eq!(settings.db, "other");
    assert_eq!(settings.username, "bob");
    assert_eq!(settings.password, "hunter2");
    Ok(())
}

#[test]
fn empty_host_is_rejected() {
    assert!(matches!(Settings::from_addr(""), Err(Error::BadConfig(_))));
    assert!(matches!(
        Settings::from_addr("alice:pw@"),
        Err(Error::BadConfig(_))
    ));
}

#[test]
fn bad_port_is_rejected() {
    assert!(matches!(
        Settings::from_addr("ticks:notaport"),
        Err(Error::BadConfig(_))
    ));
}
