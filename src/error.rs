// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the driver.
#[derive(Debug, Error)]
pub enum Error {
    /// The initial connect failed or timed out.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// A request was issued while the connection was not established.
    #[error("not connected")]
    NotConnected,

    /// The connection died while requests were in flight; every
    /// outstanding synchronous waiter is woken with this error.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The per-request deadline elapsed before the response arrived.
    #[error("timeout")]
    Timeout,

    /// The server replied with an error string, surfaced verbatim.
    #[error("server error: {0}")]
    Server(String),

    /// A frame or envelope could not be encoded or decoded.
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the error kinds that indicate the connection itself is
    /// unusable rather than a single request having failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailed(_) | Error::NotConnected | Error::ConnectionLost(_)
        )
    }
}
