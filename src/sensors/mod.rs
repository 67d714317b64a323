//! Sensor model
//!
//! Sensors hold the last reading received from the sensor module together
//! with the time it last changed. They are written only by the serial I/O
//! thread's line parser; everything else reads them or subscribes to change
//! events.
//!
//! # Change notification
//!
//! [`Sensor::subscribe`] hands out a channel receiver. An event is sent only
//! when an update actually changes the stored value, so a device repeating
//! the same reading at 10Hz produces no traffic. Channels are unbounded so
//! publishing never blocks the I/O thread; receivers that have been dropped
//! are pruned on the next event.

mod accelerometer;
mod ultrasonic;

pub use accelerometer::AccelerometerSensor;
pub use ultrasonic::UltrasonicSensor;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::time::Instant;

/// Three-axis reading in g
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Typed sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// Ultrasonic distance in centimetres
    Distance(i32),
    /// Accelerometer reading in g
    Acceleration(Vector3),
}

/// Change notification sent to subscribers
#[derive(Debug, Clone)]
pub struct ReadingChanged {
    /// Name of the sensor that changed
    pub sensor: &'static str,
    /// The new reading
    pub reading: SensorReading,
    /// When the change was accepted
    pub timestamp: Instant,
}

/// Common capability of every sensor
pub trait Sensor: Send + Sync {
    /// Human-readable sensor name
    fn name(&self) -> &'static str;

    /// Current reading
    fn reading(&self) -> SensorReading;

    /// Time of the last accepted change, `None` until the first one
    fn reading_time(&self) -> Option<Instant>;

    /// Reading formatted for display (status screens, logs)
    fn display_reading(&self) -> String;

    /// Register for change notifications
    fn subscribe(&self) -> Receiver<ReadingChanged>;
}

/// Stored value plus the time it was last changed
#[derive(Clone, Copy)]
struct Stamped<T> {
    value: T,
    changed_at: Option<Instant>,
}

/// Observable value shared by the concrete sensor types
///
/// Reads take a short read lock; the writer holds the write lock only for
/// the compare-and-store, never while notifying.
pub(crate) struct Observed<T> {
    name: &'static str,
    to_reading: fn(T) -> SensorReading,
    current: RwLock<Stamped<T>>,
    subscribers: Mutex<Vec<Sender<ReadingChanged>>>,
}

impl<T: Copy + PartialEq> Observed<T> {
    pub(crate) fn new(name: &'static str, initial: T, to_reading: fn(T) -> SensorReading) -> Self {
        Self {
            name,
            to_reading,
            current: RwLock::new(Stamped {
                value: initial,
                changed_at: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn get(&self) -> T {
        self.current.read().value
    }

    pub(crate) fn reading(&self) -> SensorReading {
        (self.to_reading)(self.get())
    }

    pub(crate) fn changed_at(&self) -> Option<Instant> {
        self.current.read().changed_at
    }

    /// Store `value` if it differs from the current one.
    ///
    /// Returns whether a change was accepted (and subscribers notified).
    pub(crate) fn update(&self, value: T) -> bool {
        let now = Instant::now();
        {
            let mut current = self.current.write();
            if current.value == value {
                return false;
            }
            *current = Stamped {
                value,
                changed_at: Some(now),
            };
        }

        self.notify(ReadingChanged {
            sensor: self.name,
            reading: (self.to_reading)(value),
            timestamp: now,
        });
        true
    }

    pub(crate) fn subscribe(&self) -> Receiver<ReadingChanged> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, event: ReadingChanged) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
