//! Hardware Safety for Sweep Execution
//!
//! Ensures the magnet supply is left de-energized however a sweep ends.
//!
//! # Problem
//!
//! A sweep leaves the supply driving up to 35 V into the coil. If the sweep fails,
//! is cancelled or panics mid-way, the coil stays energized and heats up.
//!
//! # Solution
//!
//! - [`StopFlag`]: shared cooperative stop request, checked between setpoints
//! - [`PanicGuard`]: RAII guard that runs synchronous cleanup on drop
//! - [`safe_shutdown`]: commands zero volts, then output off, attempting both
//! - [`with_safe_shutdown`]: runs a future and always performs [`safe_shutdown`]
//!   afterwards, the async equivalent of try/finally. A panic inside the future is
//!   caught, the supply is shut down, then the panic resumes.
//!
//! # Example
//!
//! ```rust,ignore
//! let stop = StopFlag::new();
//! let result = with_safe_shutdown(supply.as_ref(), &stop, async {
//!     sequencer
//!         .run(&setpoints, Polarity::Positive, &mut recorder, &mut counter)
//!         .await
//! })
//! .await;
//! ```

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AppResult, InstrumentContext, SweepError};
use crate::hardware::VoltageSource;

// =============================================================================
// Panic Guard (Synchronous)
// =============================================================================

/// A synchronous RAII guard that executes cleanup when dropped.
///
/// Cleanup cannot run async code, so it is used for flags and logging only. The
/// instrument shutdown itself happens in [`with_safe_shutdown`].
pub struct PanicGuard {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
    name: String,
}

impl PanicGuard {
    /// Create a named panic guard.
    pub fn named<F>(name: impl Into<String>, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Some(Box::new(cleanup)),
            name: name.into(),
        }
    }

    /// Dismiss the guard without running cleanup.
    pub fn dismiss(mut self) {
        self.cleanup = None;
    }

    /// Check if the guard is still armed.
    pub fn is_armed(&self) -> bool {
        self.cleanup.is_some()
    }
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if std::thread::panicking() {
                error!(guard = %self.name, "Guard triggered during panic, executing cleanup");
            }

            // Never double-panic from inside drop
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup));
            if result.is_err() {
                error!(guard = %self.name, "Cleanup panicked");
            }
        }
    }
}

// =============================================================================
// Stop Flag
// =============================================================================

/// Cooperative stop request shared between the CLI signal handler and the sweep.
///
/// Built on a [`CancellationToken`]; clones share the same token and reason. Once
/// requested, a stop cannot be withdrawn.
#[derive(Clone)]
pub struct StopFlag {
    token: CancellationToken,
    reason: Arc<std::sync::RwLock<Option<String>>>,
}

impl Default for StopFlag {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(std::sync::RwLock::new(None)),
        }
    }
}

impl StopFlag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running sweep to stop before its next setpoint.
    ///
    /// The first reason given is kept.
    pub fn request_stop(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.reason.write() {
            if r.is_none() {
                *r = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given with the stop request.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Resolve once a stop has been requested.
    ///
    /// Used to race unbounded waits such as operator prompts.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    /// Guard that requests a stop if dropped while armed.
    pub fn guard(&self, context: impl Into<String>) -> PanicGuard {
        let flag = self.clone();
        let ctx = context.into();
        PanicGuard::named(ctx.clone(), move || {
            flag.request_stop(format!("Panic in: {}", ctx));
        })
    }
}

// =============================================================================
// Safe Shutdown
// =============================================================================

/// Command zero volts, then disable output.
///
/// Both commands are attempted even if the first fails.
///
/// # Errors
/// [`SweepError::ShutdownFailed`] with every command that failed.
pub async fn safe_shutdown(supply: &dyn VoltageSource) -> AppResult<()> {
    info!("Safe shutdown: zero volts, output off");
    let mut failures = Vec::new();

    if let Err(e) = supply.set_voltage(0.0).await.during("set_voltage") {
        error!(error = %e, "Failed to zero supply voltage");
        failures.push(e);
    }
    if let Err(e) = supply.enable_output(false).await.during("enable_output") {
        error!(error = %e, "Failed to disable supply output");
        failures.push(e);
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SweepError::ShutdownFailed(failures))
    }
}

/// Run `body`, then always perform [`safe_shutdown`] exactly once.
///
/// The body's error takes precedence; a shutdown failure after a successful body is
/// returned instead of the body's value.
///
/// # Panics
/// If the body panics, `stop` is set and the supply is shut down, then the panic
/// resumes.
pub async fn with_safe_shutdown<T, F>(
    supply: &dyn VoltageSource,
    stop: &StopFlag,
    body: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    let guard = stop.guard("sweep");
    let result = match AssertUnwindSafe(body).catch_unwind().await {
        Ok(result) => {
            guard.dismiss();
            result
        }
        Err(payload) => {
            drop(guard);
            error!("Sweep panicked, shutting down supply before unwinding");
            if let Err(e) = safe_shutdown(supply).await {
                error!(error = %e, "Shutdown after panic failed");
            }
            std::panic::resume_unwind(payload);
        }
    };

    let shutdown = safe_shutdown(supply).await;
    match (result, shutdown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(shutdown_err)) => {
            warn!(error = %shutdown_err, "Shutdown also failed after sweep error");
            Err(e)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
