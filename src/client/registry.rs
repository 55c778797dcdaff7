// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::{Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    client::common::lock,
    error::{Error, Result},
    models::value::{Reply, ResultSet, Value},
};

/// Invoked on the reactor thread when the response for its ticket
/// arrives or the default timeout fires.
pub type Callback = Box<dyn FnOnce(Result<ResultSet>) + Send + 'static>;

/// Bounded condvar wait so a blocked caller re-checks its deadline
/// promptly.
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Correlates responses to pending requests by ticket.
///
/// Callbacks and the prepared-statement cache share one lock; delivered
/// values live in a separate store with its own lock and condvar, so
/// the reactor's notification path never contends with a waiter that is
/// holding the store.
#[derive(Default)]
pub struct Registry {
    pending: Mutex<Pending>,
    store: Mutex<Store>,
    arrived: Condvar,
}

#[derive(Default)]
struct Pending {
    /// `None` marks a ticket whose waiter already gave up; the late
    /// response is dropped on arrival.
    callbacks: HashMap<i64, Option<Callback>>,
    prepared: HashMap<String, i64>,
}

#[derive(Default)]
struct Store {
    slots: HashMap<i64, Reply>,
    /// Connection-level failure, fanned out to every waiter.
    fatal: Option<String>,
}

impl Registry {
    pub fn register_callback(&self, ticket: i64, callback: Callback) {
        lock(&self.pending).callbacks.insert(ticket, Some(callback));
    }

    pub fn remove_callback(&self, ticket: i64) {
        lock(&self.pending).callbacks.remove(&ticket);
    }

    /// Timer expiry: swaps the callback for the empty marker so the
    /// late response is discarded when it eventually arrives. Returns
    /// the callback to fail, or nothing when the response won the race.
    pub fn take_expired(&self, ticket: i64) -> Option<Callback> {
        lock(&self.pending)
            .callbacks
            .get_mut(&ticket)
            .and_then(Option::take)
    }

    /// Delivers one response. Callback tickets are consumed here;
    /// everything else lands in the store for a synchronous waiter.
    ///
    /// A scalar acknowledgement on a callback ticket carries no rows
    /// and is dropped; only the execute path registers callbacks, and
    /// it expects a result set or an error string.
    pub fn notify(&self, ticket: i64, reply: Reply) {
        let callback = {
            let mut pending = lock(&self.pending);
            match pending.callbacks.remove(&ticket) {
                Some(Some(callback)) => Some(callback),
                // the waiter timed out; drop the late response
                Some(None) => return,
                None => None,
            }
        };
        if let Some(callback) = callback {
            match reply {
                Reply::Rows(rows) => callback(Ok(rows)),
                Reply::Scalar(Value::Text(err)) => callback(Err(Error::Server(err))),
                Reply::Scalar(_) => {},
            }
            return;
        }
        let mut store = lock(&self.store);
        store.slots.insert(ticket, reply);
        self.arrived.notify_all();
    }

    /// Blocks until the ticket's response arrives, the connection
    /// fails, or the timeout elapses. `timeout <= 0` waits forever.
    ///
    /// A timed-out waiter leaves the empty-callback marker behind and
    /// clears its slot, so a late response is discarded instead of
    /// parking in the store.
    pub fn wait(&self, ticket: i64, timeout: f64) -> Result<Reply> {
        let deadline =
            (timeout > 0.0).then(|| Instant::now() + Duration::from_secs_f64(timeout));
        let mut store = lock(&self.store);
        loop {
            if let Some(reply) = store.slots.remove(&ticket) {
                if let Reply::Scalar(Value::Text(err)) = reply {
                    return Err(Error::Server(err));
                }
                return Ok(reply);
            }
            if let Some(reason) = &store.fatal {
                return Err(Error::ConnectionLost(reason.clone()));
            }
            store = self
                .arrived
                .wait_timeout(store, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                drop(store);
                self.abandon(ticket);
                return Err(Error::Timeout);
            }
        }
    }

    fn abandon(&self, ticket: i64) {
        lock(&self.pending).callbacks.insert(ticket, None);
        lock(&self.store).slots.remove(&ticket);
    }

    /// Wakes every synchronous waiter with `ConnectionLost`. The mark
    /// persists until the next successful connect.
    pub fn fail_all(&self, reason: &str) {
        lock(&self.store).fatal = Some(reason.to_string());
        self.arrived.notify_all();
    }

    /// A fresh socket is live again; new waiters must not observe the
    /// previous failure.
    pub fn revive(&self) {
        lock(&self.store).fatal = None;
    }

    /// Teardown: drops every pending callback and delivered value and
    /// empties the prepared cache (prepared ids are server-side state).
    pub fn clear(&self) {
        {
            let mut pending = lock(&self.pending);
            pending.callbacks.clear();
            pending.prepared.clear();
        }
        lock(&self.store).slots.clear();
    }

    pub fn prepared_id(&self, sql: &str) -> Option<i64> {
        lock(&self.pending).prepared.get(sql).copied()
    }

    pub fn cache_prepared(&self, sql: &str, id: i64) {
        lock(&self.pending).prepared.insert(sql.to_string(), id);
    }
}
