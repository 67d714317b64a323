//! RC car core - control loop and serial hardware interface for an
//! autonomous RC car
//!
//! The car's sensor module (ultrasonic rangers, accelerometer, steering and
//! throttle servos) sits behind a serial link. [`hardware`] owns that link,
//! [`event_loop`] runs safety interrupts and AI handlers against it.

pub mod config;
pub mod error;
pub mod event_loop;
pub mod hardware;
pub mod sensors;
pub mod servo;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use event_loop::{AiHandler, AiOutcome, CarEventLoop, ControlValues, InterruptHandler};
pub use hardware::{CarHardwareInterface, SerialCarHardwareInterface};
pub use state::{CarState, UltrasonicSensorIndex};
