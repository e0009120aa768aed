// =============================================================================
// Supervisor: cancellable background tasks with panic isolation
// =============================================================================
//
// Every long-lived worker in the engine runs under a Supervisor:
//
//   - `go`      spawns a one-shot worker. A panic is caught and reported to
//               the panic hook; the worker is not restarted.
//   - `safe_go` spawns a worker inside a retry loop. Each attempt runs in an
//               inner task; a panic surfaces through that task's join handle,
//               the restart hook fires, and after `retry_interval` (or
//               cancellation) the task is invoked again.
//   - `stop`    cancels the shared token and waits until every worker has
//               returned.
//
// There is no panic budget. A task that panics on every run restarts until
// `stop` is called.
// =============================================================================

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;

/// Hook invoked with the rendered panic message.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Default pause between a panic and the next attempt.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default period for worker health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Runs background workers with panic recovery and optional restart.
pub struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
    retry_interval: Duration,
    health_check_interval: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL, DEFAULT_HEALTH_CHECK_INTERVAL)
    }
}

impl Supervisor {
    pub fn new(retry_interval: Duration, health_check_interval: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            retry_interval,
            health_check_interval,
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Cancellation token shared by every worker of this supervisor.
    pub fn done(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn a one-shot worker.
    ///
    /// The task receives the shared cancellation token. If it panics, the
    /// panic is recovered and passed to `on_panic`, or logged when no hook
    /// is given.
    pub fn go<F, Fut>(&self, task: F, on_panic: Option<PanicHook>) -> Result<(), EngineError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let token = self.token.clone();
        self.tracker.spawn(async move {
            if let Err(payload) = AssertUnwindSafe(task(token)).catch_unwind().await {
                let message = panic_message(payload.as_ref());
                match on_panic {
                    Some(hook) => hook(message.as_str()),
                    None => error!(panic = %message, "supervised task panicked"),
                }
            }
        });
        Ok(())
    }

    /// Spawn a worker that is restarted after every panic.
    ///
    /// `task` is invoked once per attempt. `on_restart` is called once per
    /// panic, before the retry pause. A task that returns normally is not
    /// restarted.
    pub fn safe_go<F, Fut>(&self, task: F, on_restart: Option<PanicHook>) -> Result<(), EngineError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let token = self.token.clone();
        let retry_interval = self.retry_interval;

        self.tracker.spawn(async move {
            let mut attempt: u64 = 0;
            loop {
                if token.is_cancelled() {
                    break;
                }
                attempt += 1;

                let inner = tokio::spawn(task(token.clone()));
                match inner.await {
                    Ok(()) => {
                        debug!(attempt, "supervised task returned");
                        break;
                    }
                    Err(join_err) if join_err.is_panic() => {
                        let message = panic_message(join_err.into_panic().as_ref());
                        match &on_restart {
                            Some(hook) => hook(message.as_str()),
                            None => warn!(
                                attempt,
                                panic = %message,
                                retry_ms = retry_interval.as_millis() as u64,
                                "supervised task panicked — restarting"
                            ),
                        }

                        tokio::select! {
                            _ = tokio::time::sleep(retry_interval) => {}
                            _ = token.cancelled() => break,
                        }
                    }
                    Err(join_err) => {
                        debug!(error = %join_err, "supervised task aborted");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Cancel every worker and wait for all of them to return.
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("supervisor stopped — all workers drained");
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
