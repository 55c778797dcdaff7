// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Pluggable sink for the connection's own diagnostics.
///
/// The driver reports connection lifecycle events and dropped frames
/// through this trait; everything defaults to the `tracing` pipeline
/// unless the application installs its own sink via `set_logger`.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Default sink forwarding both severities to `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str) {
        info!(target: "tickdb", "{msg}");
    }

    fn error(&self, msg: &str) {
        error!(target: "tickdb", "{msg}");
    }
}

static DEFAULT_LOGGER: Lazy<Arc<dyn Logger>> = Lazy::new(|| Arc::new(TracingLogger));

pub fn default_logger() -> Arc<dyn Logger> {
    Arc::clone(&DEFAULT_LOGGER)
}

/// Installs a process-wide fmt subscriber honoring `RUST_LOG`.
/// Subsequent calls are no-ops.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
