// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{
    client::connection::ConnState,
    error::Result,
    models::value::{Reply, ResultSet},
};

/// Handle to one in-flight request, bound to its ticket.
pub struct QueryFuture {
    ticket: i64,
    conn: Arc<ConnState>,
}

impl QueryFuture {
    pub(crate) fn new(ticket: i64, conn: Arc<ConnState>) -> Self {
        Self { ticket, conn }
    }

    pub fn ticket(&self) -> i64 {
        self.ticket
    }

    /// Blocks until the response arrives; `timeout <= 0` waits forever.
    ///
    /// Scalar acknowledgements (login, use, batch acks) yield an empty
    /// result set; a server error string raises [`Error::Server`] and a
    /// dropped connection raises [`Error::ConnectionLost`].
    ///
    /// [`Error::Server`]: crate::error::Error::Server
    /// [`Error::ConnectionLost`]: crate::error::Error::ConnectionLost
    pub fn get(&self, timeout: f64) -> Result<ResultSet> {
        match self.conn.wait_reply(self.ticket, timeout)? {
            Reply::Rows(rows) => Ok(rows),
            Reply::Scalar(_) => Ok(ResultSet::default()),
        }
    }
}
