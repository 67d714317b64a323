//! Serial link to the sensor module
//!
//! # Thread Model
//!
//! A single I/O thread owns the transport. Each iteration it:
//!
//! 1. Drains the outbound queue and writes every pending frame, in order
//! 2. Reads whatever bytes are available (blocking up to the read timeout)
//! 3. Splits them into lines and hands complete lines to the telemetry parser
//!
//! Any thread may enqueue frames; the queue is the only state shared with
//! writers. Sensors are updated from this thread only.
//!
//! # Startup
//!
//! The port is opened on the I/O thread. The sensor module resets when the
//! port opens, so nothing is written until the startup delay has passed;
//! frames enqueued in the meantime are kept and flushed afterwards. If the
//! port cannot be opened the link goes to [`LinkState::Failed`] and rejects
//! further frames.

use super::CarSensors;
use super::protocol::ServoFrame;
use super::telemetry::{self, LineBuffer};
use crate::error::{Error, Result};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bytes requested per read
const READ_CHUNK: usize = 32;

/// Pause after an empty read (mock transports return immediately)
const IDLE_SLEEP_MS: u64 = 2;

/// Pause after a read error before retrying
const ERROR_BACKOFF_MS: u64 = 10;

/// Granularity of the startup wait, so shutdown is noticed promptly
const STARTUP_POLL_MS: u64 = 20;

/// Opens the transport on the I/O thread
pub type TransportOpener = Box<dyn FnOnce() -> Result<Box<dyn Transport>> + Send>;

/// Lifecycle of the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// Port open pending or waiting out the device reset
    Connecting = 0,
    /// Exchanging frames and telemetry
    Connected = 1,
    /// Port could not be opened
    Failed = 2,
    /// I/O thread has exited
    Closed = 3,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkState::Connecting,
            1 => LinkState::Connected,
            2 => LinkState::Failed,
            _ => LinkState::Closed,
        }
    }
}

struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Frames waiting for the I/O thread
///
/// Once closed the queue refuses new frames. Closing and taking the last
/// frames happen under one lock, so a frame is either handed to the final
/// flush or rejected.
#[derive(Default)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    frames: Vec<ServoFrame>,
    closed: bool,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the queue is closed
    pub fn push(&self, frame: ServoFrame) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.frames.push(frame);
        true
    }

    /// Take every queued frame, leaving the queue empty
    pub fn drain(&self) -> Vec<ServoFrame> {
        std::mem::take(&mut self.inner.lock().frames)
    }

    /// Refuse further frames and take whatever is left
    pub fn close(&self) -> Vec<ServoFrame> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.frames)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }
}

/// Handle to the serial I/O thread
pub struct SerialLink {
    queue: Arc<OutboundQueue>,
    state: Arc<AtomicLinkState>,
    shutdown: Arc<AtomicBool>,
    io_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    /// Spawn the I/O thread
    pub fn start(
        opener: TransportOpener,
        sensors: Arc<CarSensors>,
        startup_delay: Duration,
    ) -> Result<Self> {
        let queue = Arc::new(OutboundQueue::new());
        let state = Arc::new(AtomicLinkState::new(LinkState::Connecting));
        let shutdown = Arc::new(AtomicBool::new(false));

        let io_queue = Arc::clone(&queue);
        let io_state = Arc::clone(&state);
        let io_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("serial-io".to_string())
            .spawn(move || {
                io_loop(opener, io_queue, sensors, io_state, io_shutdown, startup_delay);
            })
            .map_err(|e| Error::ThreadSpawn(format!("serial I/O thread: {}", e)))?;

        Ok(Self {
            queue,
            state,
            shutdown,
            io_handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a frame for transmission.
    ///
    /// Returns `false` without queueing if the link can no longer deliver.
    pub fn enqueue(&self, frame: ServoFrame) -> bool {
        if self.queue.push(frame) {
            return true;
        }
        log::warn!(
            "Dropping servo frame {:02X?}: serial link {:?}",
            frame.as_bytes(),
            self.state.load()
        );
        false
    }

    pub fn state(&self) -> LinkState {
        self.state.load()
    }

    /// Frames not yet written to the device
    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    /// Stop the I/O thread and wait for it to close the port
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let handle = self.io_handle.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| Error::ThreadPanic("serial I/O thread".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Serial link shutdown failed: {}", e);
        }
    }
}

fn io_loop(
    opener: TransportOpener,
    queue: Arc<OutboundQueue>,
    sensors: Arc<CarSensors>,
    state: Arc<AtomicLinkState>,
    shutdown: Arc<AtomicBool>,
    startup_delay: Duration,
) {
    let mut transport = match opener() {
        Ok(transport) => transport,
        Err(e) => {
            log::error!("Failed to open serial device: {}", e);
            discard_queued(&queue);
            state.store(LinkState::Failed);
            return;
        }
    };

    // Device resets on port open
    log::info!(
        "Serial port open, waiting {}ms for device reset",
        startup_delay.as_millis()
    );
    if !wait_for_startup(&shutdown, startup_delay) {
        discard_queued(&queue);
        state.store(LinkState::Closed);
        log::info!("Serial I/O thread exiting (shutdown during startup)");
        return;
    }
    // Boot chatter from the reset is not telemetry
    if let Err(e) = transport.discard_input() {
        log::warn!("Could not discard startup input: {}", e);
    }
    state.store(LinkState::Connected);
    log::info!("Serial link connected");

    let mut lines = LineBuffer::new();
    let mut read_buf = [0u8; READ_CHUNK];

    while !shutdown.load(Ordering::Acquire) {
        flush_outbound(transport.as_mut(), &queue);

        match transport.read(&mut read_buf) {
            Ok(0) => thread::sleep(Duration::from_millis(IDLE_SLEEP_MS)),
            Ok(n) => {
                for &byte in &read_buf[..n] {
                    if let Some(line) = lines.push(byte) {
                        telemetry::handle_line(&line, &sensors);
                    }
                }
            }
            Err(e) => {
                log::error!("Serial read error: {}", e);
                thread::sleep(Duration::from_millis(ERROR_BACKOFF_MS));
            }
        }
    }

    // Deliver anything queued during shutdown (e.g. the neutral frame from a loop stop)
    write_frames(transport.as_mut(), &queue.close());
    state.store(LinkState::Closed);
    log::info!("Serial I/O thread exiting");
}

/// Sleep out the device reset; returns `false` if shutdown was requested
fn wait_for_startup(shutdown: &AtomicBool, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(STARTUP_POLL_MS)));
    }
}

/// Close the queue without a port to write to
fn discard_queued(queue: &OutboundQueue) {
    let dropped = queue.close().len();
    if dropped > 0 {
        log::warn!("Discarded {} servo frames that never reached the device", dropped);
    }
}

/// Write every queued frame; failed frames are logged and dropped
fn flush_outbound(transport: &mut dyn Transport, queue: &OutboundQueue) {
    write_frames(transport, &queue.drain());
}

fn write_frames(transport: &mut dyn Transport, frames: &[ServoFrame]) {
    if frames.is_empty() {
        return;
    }

    for frame in frames {
        match transport.write_all(frame.as_bytes()) {
            Ok(()) => log::trace!("Wrote frame {:02X?}", frame.as_bytes()),
            Err(e) => log::warn!("Write failed for frame {:02X?}: {}", frame.as_bytes(), e),
        }
    }
    if let Err(e) = transport.flush() {
        log::warn!("Serial flush failed: {}", e);
    }
}
