// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 1116;
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection parameters.
///
/// Build one with [`Settings::from_addr`] and refine it with the
/// `with_*` setters; a setter applied after parsing overrides the
/// parsed component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Database selected right after connecting. Empty means none.
    pub db: String,
    /// Credentials for the automatic `login` after connecting. An empty
    /// username disables it.
    pub username: String,
    pub password: String,
    /// Default request deadline in seconds; `0` waits forever.
    pub default_timeout: u64,
    /// Reconnect delay in seconds after the connection drops; `0`
    /// disables auto-reconnect.
    pub auto_reconnect: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            db: String::new(),
            username: String::new(),
            password: String::new(),
            default_timeout: DEFAULT_TIMEOUT_SECS,
            auto_reconnect: 0,
        }
    }
}

impl Settings {
    /// Parses an endpoint address in any of the accepted forms:
    /// `host`, `host:port`, `user:password@host:port`,
    /// `user:password@host:port/db`, `host/db`. Omitted components keep
    /// their defaults (port 1116, no credentials, no database).
    pub fn from_addr(addr: &str) -> Result<Self> {
        let mut out = Settings::default();

        let endpoint = match addr.split_once('/') {
            Some((endpoint, db)) => {
                if !db.is_empty() {
                    out.db = db.to_string();
                }
                endpoint
            },
            None => addr,
        };

        let host_port = match endpoint.split_once('@') {
            Some((credentials, host_port)) => {
                match credentials.split_once(':') {
                    Some((username, password)) => {
                        out.username = username.to_string();
                        out.password = password.to_string();
                    },
                    None => out.username = credentials.to_string(),
                }
                host_port
            },
            None => endpoint,
        };

        match host_port.split_once(':') {
            Some((host, port)) => {
                out.host = host.to_string();
                out.port = port
                    .parse()
                    .map_err(|_| Error::BadConfig(format!("invalid port in {addr:?}")))?;
            },
            None => out.host = host_port.to_string(),
        }

        if out.host.is_empty() {
            return Err(Error::BadConfig(format!("no host in {addr:?}")));
        }

        Ok(out)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: &str) -> Self {
        self.db = db.to_string();
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout = secs;
        self
    }

    pub fn with_auto_reconnect(mut self, secs: u64) -> Self {
        self.auto_reconnect = secs;
        self
    }
}
