// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::mpsc,
    thread::{self, ThreadId},
};

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Handle to the connection's background I/O thread.
///
/// One reactor thread drives a current-thread tokio runtime for the
/// lifetime of its connection: it owns the socket halves, the outbox
/// drain and every timer. Caller threads only spawn work onto it.
#[derive(Debug)]
pub struct Reactor {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: CancellationToken,
}

impl Reactor {
    /// Spawns the reactor thread and blocks until its runtime is live.
    pub fn spawn(name: &str) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let (ready_tx, ready_rx) = mpsc::channel();
        // the thread parks in block_on until `stop` fires; it is not
        // joined, teardown is the token cancellation
        let _worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                },
            };
            let _ = ready_tx.send(Ok((runtime.handle().clone(), thread::current().id())));
            runtime.block_on(stop.cancelled());
        })?;
        let (handle, thread_id) = ready_rx
            .recv()
            .map_err(|_| Error::ConnectFailed("reactor thread died during startup".into()))??;
        Ok(Self {
            handle,
            thread_id,
            shutdown,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// True when the caller is the reactor thread itself. Blocking
    /// waits self-deadlock there, so entry points that park the caller
    /// refuse to run on it.
    pub fn on_reactor_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops the runtime; queued tasks are dropped, not drained.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
