//! AI computation worker
//!
//! One worker thread runs the AI pipeline for one snapshot and commits the
//! result to the servos. Cancellation is cooperative: the pipeline checks
//! the token between handlers, and the commit happens under a gate that
//! [`CancellationToken::cancel`] also takes, so once `cancel` returns no
//! write from that worker can reach the hardware.

use super::handlers::{AiHandler, AiOutcome, ControlValues};
use crate::error::{Error, Result};
use crate::hardware::CarHardwareInterface;
use crate::state::CarState;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Cooperative cancellation flag with a commit gate
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    commit_gate: Mutex<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wait out any commit in progress
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        drop(self.commit_gate.lock());
    }

    /// Run `commit` unless cancelled; returns whether it ran
    pub fn commit_unless_cancelled<F: FnOnce()>(&self, commit: F) -> bool {
        let _gate = self.commit_gate.lock();
        if self.is_cancelled() {
            return false;
        }
        commit();
        true
    }
}

/// Fold the AI handlers over `state`, starting from zero throttle and steering
///
/// Returns `Ok(None)` if the token was cancelled before the fold finished.
/// A handler error stops the fold and is returned as is.
pub fn run_ai_pipeline(
    handlers: &[Arc<dyn AiHandler>],
    state: &CarState,
    token: &CancellationToken,
) -> Result<Option<ControlValues>> {
    let mut current = ControlValues::default();

    for handler in handlers {
        if token.is_cancelled() {
            return Ok(None);
        }
        if let AiOutcome::Update(values) = handler.perform_ai_work(state, current)? {
            current = values;
        }
    }

    if token.is_cancelled() {
        return Ok(None);
    }
    Ok(Some(current))
}

/// A running AI computation
///
/// Dropping the worker cancels and joins it, so an unwinding scheduler
/// cannot leave a computation behind that commits later.
pub(crate) struct AiWorker {
    token: Arc<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl AiWorker {
    pub(crate) fn spawn(
        hardware: Arc<dyn CarHardwareInterface>,
        handlers: Arc<[Arc<dyn AiHandler>]>,
        state: CarState,
    ) -> Result<Self> {
        let token = Arc::new(CancellationToken::new());
        let worker_token = Arc::clone(&token);

        let handle = thread::Builder::new()
            .name("ai-worker".to_string())
            .spawn(move || match run_ai_pipeline(&handlers, &state, &worker_token) {
                Ok(Some(values)) => {
                    worker_token.commit_unless_cancelled(|| commit(hardware.as_ref(), values));
                }
                Ok(None) => log::debug!("AI computation cancelled"),
                Err(e) => log::error!("AI computation failed: {}", e),
            })
            .map_err(|e| Error::ThreadSpawn(format!("AI worker: {}", e)))?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop any further commits; returns once none can happen
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the thread to exit
    pub(crate) fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("AI worker panicked; nothing was committed");
            }
        }
    }
}

impl Drop for AiWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
            self.join_thread();
        }
    }
}

fn commit(hardware: &dyn CarHardwareInterface, values: ControlValues) {
    if !hardware.steering_servo().set_value(values.steering) {
        log::warn!("AI steering write of {:.3} rejected", values.steering);
    }
    if !hardware.throttle_servo().set_value(values.throttle) {
        log::warn!("AI throttle write of {:.3} rejected", values.throttle);
    }
}
