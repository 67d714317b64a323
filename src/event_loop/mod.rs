//! Control loop for the car
//!
//! # Thread Model
//!
//! - **Scheduler thread** (`car-event-loop`): ticks at the target rate. Each
//!   tick takes a [`CarState`] snapshot and checks the interrupt handlers;
//!   if none fires and no AI computation is in flight, it launches one.
//! - **AI worker** (`ai-worker`): at most one at a time. Folds the AI
//!   handlers over the snapshot and commits the result to the servos.
//!
//! An interrupt zeroes the throttle (steering stays where it is) and ends
//! the scheduler thread. [`CarEventLoop::stop`] ends it from outside and
//! then sets both servos to neutral. Both paths cancel the in-flight worker
//! first, so no AI write reaches the hardware after the halt. An interrupt
//! handler that panics is treated as having fired.

mod handlers;
mod worker;

pub use handlers::{AiHandler, AiOutcome, ControlValues, InterruptHandler};
pub use worker::{CancellationToken, run_ai_pipeline};

use crate::config::EventLoopConfig;
use crate::error::{Error, Result};
use crate::hardware::CarHardwareInterface;
use crate::state::CarState;
use worker::AiWorker;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default tick rate
pub const DEFAULT_TARGET_HZ: f64 = 100.0;

/// Scheduler for interrupt checks and AI computation
pub struct CarEventLoop {
    hardware: Arc<dyn CarHardwareInterface>,
    interrupt_handlers: Vec<Arc<dyn InterruptHandler>>,
    ai_handlers: Vec<Arc<dyn AiHandler>>,
    target_hz: f64,
    shutdown: Arc<AtomicBool>,
    scheduler_thread: Option<JoinHandle<()>>,
}

impl CarEventLoop {
    pub fn new(hardware: Arc<dyn CarHardwareInterface>) -> Self {
        Self::with_target_hz(hardware, DEFAULT_TARGET_HZ)
    }

    /// Non-positive or non-finite rates fall back to [`DEFAULT_TARGET_HZ`]
    pub fn with_target_hz(hardware: Arc<dyn CarHardwareInterface>, target_hz: f64) -> Self {
        let target_hz = if target_hz.is_finite() && target_hz > 0.0 {
            target_hz
        } else {
            log::warn!(
                "Invalid target rate {}, using {}Hz",
                target_hz,
                DEFAULT_TARGET_HZ
            );
            DEFAULT_TARGET_HZ
        };

        Self {
            hardware,
            interrupt_handlers: Vec::new(),
            ai_handlers: Vec::new(),
            target_hz,
            shutdown: Arc::new(AtomicBool::new(false)),
            scheduler_thread: None,
        }
    }

    pub fn from_config(hardware: Arc<dyn CarHardwareInterface>, config: &EventLoopConfig) -> Self {
        Self::with_target_hz(hardware, config.target_hz)
    }

    pub fn target_hz(&self) -> f64 {
        self.target_hz
    }

    pub fn hardware(&self) -> &Arc<dyn CarHardwareInterface> {
        &self.hardware
    }

    /// Whether the scheduler thread is alive
    ///
    /// Turns false on its own after an interrupt halts the loop.
    pub fn is_running(&self) -> bool {
        self.scheduler_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the scheduler thread
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        if self.interrupt_handlers.is_empty() && self.ai_handlers.is_empty() {
            return Err(Error::NothingToRun);
        }
        self.reap_finished();

        self.shutdown.store(false, Ordering::Release);
        let scheduler = Scheduler {
            hardware: Arc::clone(&self.hardware),
            interrupt_handlers: Arc::from(self.interrupt_handlers.clone()),
            ai_handlers: Arc::from(self.ai_handlers.clone()),
            period: Duration::from_secs_f64(1.0 / self.target_hz),
            shutdown: Arc::clone(&self.shutdown),
        };

        let handle = thread::Builder::new()
            .name("car-event-loop".to_string())
            .spawn(move || scheduler.run())
            .map_err(|e| Error::ThreadSpawn(format!("event loop: {}", e)))?;

        log::info!(
            "Event loop started at {}Hz ({} interrupt handlers, {} AI handlers)",
            self.target_hz,
            self.interrupt_handlers.len(),
            self.ai_handlers.len()
        );
        self.scheduler_thread = Some(handle);
        Ok(())
    }

    /// Stop the loop and put both servos in neutral
    ///
    /// Blocks until the scheduler thread and any AI computation have exited.
    /// Does nothing if the loop is not running.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            self.reap_finished();
            return Ok(());
        }

        log::info!("Stopping event loop");
        self.shutdown.store(true, Ordering::Release);

        let joined = match self.scheduler_thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::ThreadPanic("event loop scheduler".to_string())),
            None => Ok(()),
        };

        if !self.hardware.steering_servo().set_value(0.0) {
            log::warn!("Failed to center steering on stop");
        }
        if !self.hardware.throttle_servo().set_value(0.0) {
            log::warn!("Failed to zero throttle on stop");
        }
        log::info!("Event loop stopped");
        joined
    }

    /// Remove every handler
    pub fn reset_state(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        self.interrupt_handlers.clear();
        self.ai_handlers.clear();
        Ok(())
    }

    pub fn add_interrupt_handler<H: InterruptHandler + 'static>(&mut self, handler: H) -> Result<()> {
        self.ensure_stopped()?;
        self.interrupt_handlers.push(Arc::new(handler));
        Ok(())
    }

    pub fn add_ai_handler<H: AiHandler + 'static>(&mut self, handler: H) -> Result<()> {
        self.ensure_stopped()?;
        self.ai_handlers.push(Arc::new(handler));
        Ok(())
    }

    pub fn interrupt_handler_count(&self) -> usize {
        self.interrupt_handlers.len()
    }

    pub fn ai_handler_count(&self) -> usize {
        self.ai_handlers.len()
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::LoopRunning);
        }
        Ok(())
    }

    /// Join a scheduler thread that ended on its own (interrupt halt)
    fn reap_finished(&mut self) {
        if let Some(handle) = self.scheduler_thread.take() {
            if handle.join().is_err() {
                log::error!("Event loop scheduler panicked");
            }
        }
    }
}

impl Drop for CarEventLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Event loop shutdown failed: {}", e);
        }
    }
}

/// State moved onto the scheduler thread
struct Scheduler {
    hardware: Arc<dyn CarHardwareInterface>,
    interrupt_handlers: Arc<[Arc<dyn InterruptHandler>]>,
    ai_handlers: Arc<[Arc<dyn AiHandler>]>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    fn run(self) {
        let mut worker: Option<AiWorker> = None;
        let mut overrun_count: u64 = 0;

        while !self.shutdown.load(Ordering::Acquire) {
            let tick_start = Instant::now();
            let state = self.hardware.create_state();

            if let Some(handler) = self.interrupt(&state) {
                log::warn!("Interrupt '{}' fired, halting", handler.name());
                self.halt(worker.take());
                return;
            }

            // Reap a worker that has finished so the next one can start
            if worker.as_ref().is_some_and(AiWorker::is_finished) {
                if let Some(done) = worker.take() {
                    done.join();
                }
            }

            if worker.is_none() && !self.ai_handlers.is_empty() {
                match AiWorker::spawn(
                    Arc::clone(&self.hardware),
                    Arc::clone(&self.ai_handlers),
                    state,
                ) {
                    Ok(started) => worker = Some(started),
                    Err(e) => log::error!("Failed to launch AI computation: {}", e),
                }
            }

            let elapsed = tick_start.elapsed();
            match self.period.checked_sub(elapsed) {
                Some(remaining) => thread::sleep(remaining),
                None => {
                    overrun_count += 1;
                    if overrun_count % 100 == 1 {
                        log::debug!(
                            "Event loop overrun: {:.1}ms (target {:.1}ms), {} overruns",
                            elapsed.as_secs_f64() * 1000.0,
                            self.period.as_secs_f64() * 1000.0,
                            overrun_count
                        );
                    }
                }
            }
        }

        if let Some(in_flight) = worker.take() {
            in_flight.cancel();
            in_flight.join();
        }
        log::debug!("Scheduler thread exiting");
    }

    /// First handler that fires; a panicking handler counts as fired
    fn interrupt(&self, state: &CarState) -> Option<&Arc<dyn InterruptHandler>> {
        self.interrupt_handlers.iter().find(|handler| {
            panic::catch_unwind(AssertUnwindSafe(|| handler.should_interrupt(state)))
                .unwrap_or_else(|_| {
                    log::error!("Interrupt '{}' panicked, treating it as fired", handler.name());
                    true
                })
        })
    }

    /// Zero the throttle and wind down the worker; steering is left alone
    fn halt(&self, worker: Option<AiWorker>) {
        if let Some(in_flight) = &worker {
            in_flight.cancel();
        }
        if !self.hardware.throttle_servo().set_value(0.0) {
            log::error!("Failed to zero throttle after interrupt");
        }
        if let Some(in_flight) = worker {
            in_flight.join();
        }
    }
}
