//! Inbound telemetry parsing
//!
//! The sensor module reports newline-terminated ASCII lines:
//!
//! ```text
//! DISTANCE:<a>,<b>,<c>,<d>   ultrasonic distances in cm
//! ACCEL:<x>,<y>,<z>          accelerometer reading in g
//! SERVO:<status>             acknowledgement of a servo frame ("OK")
//! ```
//!
//! Entries that fail to parse become 0 rather than rejecting the line; a
//! line with the wrong number of entries is discarded as a whole. Lines with
//! any other prefix are ignored.

use super::CarSensors;
use crate::state::UltrasonicSensorIndex;

const DISTANCE_PREFIX: &str = "DISTANCE:";
const ACCEL_PREFIX: &str = "ACCEL:";
const SERVO_PREFIX: &str = "SERVO:";

/// Number of entries in a DISTANCE line
pub const DISTANCE_COUNT: usize = 4;
/// Number of entries in an ACCEL line
pub const ACCEL_COUNT: usize = 3;

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LEN: usize = 256;

/// Where each DISTANCE entry goes, by position in the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DistanceSlot {
    Front(UltrasonicSensorIndex),
    Rear,
}

/// Firmware order: middle, left, right, rear
const DISTANCE_SLOTS: [DistanceSlot; DISTANCE_COUNT] = [
    DistanceSlot::Front(UltrasonicSensorIndex::FrontMiddle),
    DistanceSlot::Front(UltrasonicSensorIndex::FrontLeft),
    DistanceSlot::Front(UltrasonicSensorIndex::FrontRight),
    DistanceSlot::Rear,
];

/// A parsed telemetry line
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryLine {
    /// Distances in firmware order (count not yet validated)
    Distance(Vec<i32>),
    /// Accelerometer axes (count not yet validated)
    Accel(Vec<f64>),
    /// Servo acknowledgement status text
    ServoAck(String),
    /// Any other line
    Unrecognized,
}

/// Parse one trimmed line
pub fn parse_line(line: &str) -> TelemetryLine {
    if let Some(payload) = line.strip_prefix(DISTANCE_PREFIX) {
        let distances = split_entries(payload)
            .map(|entry| entry.parse::<i32>().unwrap_or(0))
            .collect();
        return TelemetryLine::Distance(distances);
    }

    if let Some(payload) = line.strip_prefix(ACCEL_PREFIX) {
        let axes = split_entries(payload)
            .map(|entry| {
                entry
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0)
            })
            .collect();
        return TelemetryLine::Accel(axes);
    }

    if let Some(payload) = line.strip_prefix(SERVO_PREFIX) {
        return TelemetryLine::ServoAck(payload.trim().to_string());
    }

    TelemetryLine::Unrecognized
}

fn split_entries(payload: &str) -> impl Iterator<Item = &str> {
    payload.trim().split(',').map(str::trim)
}

/// Parse a line and apply it to the sensors
pub fn handle_line(line: &str, sensors: &CarSensors) {
    log::trace!("Got line from device: {}", line);

    match parse_line(line) {
        TelemetryLine::Distance(distances) => apply_distances(&distances, line, sensors),
        TelemetryLine::Accel(axes) => apply_acceleration(&axes, line, sensors),
        TelemetryLine::ServoAck(status) => {
            if status != "OK" {
                log::warn!("Got servo response: {}", status);
            }
        }
        TelemetryLine::Unrecognized => {
            log::debug!("Ignoring unrecognized line: {:?}", line);
        }
    }
}

fn apply_distances(distances: &[i32], line: &str, sensors: &CarSensors) {
    if distances.len() != DISTANCE_COUNT {
        log::warn!(
            "Got unexpected number of distances: {} (line {:?})",
            distances.len(),
            line
        );
        return;
    }

    for (slot, &distance) in DISTANCE_SLOTS.iter().zip(distances) {
        let sensor = match slot {
            DistanceSlot::Front(index) => sensors.front(*index),
            DistanceSlot::Rear => sensors.rear(),
        };
        sensor.set_distance_cm(distance);
    }
}

fn apply_acceleration(axes: &[f64], line: &str, sensors: &CarSensors) {
    let [x, y, z] = axes else {
        log::warn!(
            "Got unexpected number of acceleration values: {} (line {:?})",
            axes.len(),
            line
        );
        return;
    };
    sensors.accelerometer().set_values(*x, *y, *z);
}

/// Accumulates inbound bytes into lines
///
/// Owned by the serial I/O thread.
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// Append a byte; returns the trimmed line when `byte` is a newline
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
            self.buffer.clear();
            return Some(line);
        }

        if self.buffer.len() >= MAX_LINE_LEN {
            log::warn!(
                "Discarding {} bytes of unterminated input from device",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        self.buffer.push(byte);
        None
    }

    /// Bytes accumulated since the last newline
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
