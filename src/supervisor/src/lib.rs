// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Signal handling, subprocess-equivalent shutdown, and fatal-termination
//! plumbing (C10).
//!
//! There is no process group to signal in an async-task model, so
//! [`Supervisor`] stands in for `kill(0, SIGTERM)` + `waitpid` with a
//! shared [`CancellationToken`] workers poll cooperatively at safe points
//! (between tables, between SQL statements), and a `JoinSet` the caller
//! drains explicitly instead of reaping child pids.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use copydb_repr::CopydbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the process-wide `tracing` subscriber. Respects `RUST_LOG`,
/// defaulting to `info`; `LogFormat::Json` is for ingestion by a log
/// pipeline, matching the `--log-format json` flag (§6).
pub fn install_tracing(log_format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Installs a panic hook that logs with a `BUG:` prefix instead of the
/// default backtrace dump. The panic itself is still propagated (tokio
/// isolates it to the panicking task, surfacing as a `JoinError`); this
/// only controls what operators see on stderr.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "BUG: worker panicked");
        default_hook(info);
    }));
}

/// Converts a worker task's [`tokio::task::JoinError`] into the same
/// `CopydbError::Bug` a detected invariant violation would produce, so
/// the orchestrator can treat "panicked" and "returned a bug error" the
/// same way: fatal to that unit, logged, but not a whole-process abort.
pub fn join_error_to_bug(e: tokio::task::JoinError) -> CopydbError {
    if e.is_cancelled() {
        CopydbError::bug("worker task was cancelled before completing")
    } else {
        CopydbError::bug(format!("worker task panicked: {e}"))
    }
}

/// Owns the shared cancellation flag workers poll, and the signal
/// handlers that trip it.
pub struct Supervisor {
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor { cancel: CancellationToken::new() }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trips the cancellation token immediately; used when a fatal error
    /// elsewhere means every other worker should stop too.
    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }

    /// Waits for SIGTERM or Ctrl-C, then trips the cancellation token and
    /// returns. Intended to be raced against the orchestrator's own
    /// future with `tokio::select!`.
    pub async fn wait_for_shutdown_signal(&self) {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler, falling back to Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                self.cancel.cancel();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down gracefully"),
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down gracefully"),
        }
        self.cancel.cancel();
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor::new()
    }
}
