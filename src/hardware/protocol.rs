//! Outbound servo frame codec
//!
//! Frame format: `[0xBA 0xBE] [STEERING] [THROTTLE] [CHECKSUM]`
//!
//! - Servo bytes are positions in degrees, `0..=180`, with 90 as neutral.
//!   A servo value `v` in `[-1.0, 1.0]` maps to `round(v * 90 + 90)`.
//! - `CHECKSUM = STEERING ^ THROTTLE`.
//!
//! Every frame carries both servos, so a single-servo change re-sends the
//! other servo's last value and the device always holds a complete state.

use crate::error::{Error, Result};

/// Frame header bytes
pub const HEADER_BYTE_1: u8 = 0xBA;
pub const HEADER_BYTE_2: u8 = 0xBE;

/// Total frame size
pub const FRAME_LEN: usize = 5;

/// Degrees per unit of servo value
const DEGREES_PER_UNIT: f64 = 90.0;

/// Neutral servo position in degrees
const NEUTRAL_DEGREES: f64 = 90.0;

/// Largest servo position in degrees
const MAX_DEGREES: f64 = 180.0;

/// Convert a servo value in `[-1.0, 1.0]` to device degrees.
///
/// Out-of-range values clamp to the ends of the scale; NaN maps to neutral.
#[inline]
pub fn servo_value_to_byte(value: f64) -> u8 {
    if value.is_nan() {
        return NEUTRAL_DEGREES as u8;
    }
    (value * DEGREES_PER_UNIT + NEUTRAL_DEGREES)
        .round()
        .clamp(0.0, MAX_DEGREES) as u8
}

/// Convert device degrees back to a servo value
#[inline]
pub fn byte_to_servo_value(degrees: u8) -> f64 {
    (degrees as f64 - NEUTRAL_DEGREES) / DEGREES_PER_UNIT
}

/// XOR checksum over the two payload bytes
#[inline]
pub fn checksum(steering: u8, throttle: u8) -> u8 {
    steering ^ throttle
}

/// Five-byte servo command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoFrame {
    data: [u8; FRAME_LEN],
}

impl ServoFrame {
    /// Build a frame from servo values
    pub fn new(steering: f64, throttle: f64) -> Self {
        Self::from_degrees(servo_value_to_byte(steering), servo_value_to_byte(throttle))
    }

    /// Build a frame from raw servo positions
    pub const fn from_degrees(steering: u8, throttle: u8) -> Self {
        Self {
            data: [
                HEADER_BYTE_1,
                HEADER_BYTE_2,
                steering,
                throttle,
                steering ^ throttle,
            ],
        }
    }

    /// Validate and decode a frame received or captured from the wire
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != HEADER_BYTE_1 || bytes[1] != HEADER_BYTE_2 {
            return Err(Error::InvalidFrame(format!(
                "bad header {:02X} {:02X}",
                bytes[0], bytes[1]
            )));
        }

        let expected = checksum(bytes[2], bytes[3]);
        if bytes[4] != expected {
            return Err(Error::ChecksumError {
                expected,
                actual: bytes[4],
            });
        }

        Ok(Self::from_degrees(bytes[2], bytes[3]))
    }

    /// Frame bytes for sending
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn steering_degrees(&self) -> u8 {
        self.data[2]
    }

    #[inline]
    pub fn throttle_degrees(&self) -> u8 {
        self.data[3]
    }

    #[inline]
    pub fn checksum(&self) -> u8 {
        self.data[4]
    }

    pub fn steering(&self) -> f64 {
        byte_to_servo_value(self.steering_degrees())
    }

    pub fn throttle(&self) -> f64 {
        byte_to_servo_value(self.throttle_degrees())
    }
}

/// Frame with both servos at neutral
pub const fn neutral_frame() -> ServoFrame {
    ServoFrame::from_degrees(NEUTRAL_DEGREES as u8, NEUTRAL_DEGREES as u8)
}
