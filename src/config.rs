//! Configuration for the RC car core
//!
//! Loads configuration from a TOML file. Every section has defaults, so a
//! config file only needs the values that differ (usually `serial_port`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub hardware: HardwareConfig,
    pub event_loop: EventLoopConfig,
    pub logging: LoggingConfig,
}

/// Serial link to the sensor module
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Serial device path (e.g. `/dev/ttyACM0`)
    pub serial_port: String,
    /// Baud rate, 9600 for the stock firmware (8N1 framing is fixed)
    pub baud_rate: u32,
    /// Delay after opening the port before anything is written.
    ///
    /// The sensor module resets whenever the port is opened and ignores
    /// input until its bootloader hands over (~2 seconds).
    pub startup_delay_ms: u64,
    /// Serial read timeout. The I/O thread flushes queued frames between
    /// reads, so this bounds outbound latency while the device is silent.
    pub read_timeout_ms: u64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Target tick frequency of the interrupt/scheduling thread
    pub target_hz: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Print ultrasonic distance changes
    pub log_distance: bool,
    /// Print accelerometer changes
    pub log_accel: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            startup_delay_ms: 2000,
            read_timeout_ms: 10,
        }
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { target_hz: 100.0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_distance: false,
            log_accel: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use rc_car_core::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("rc-car.toml")?;
    /// # Ok::<(), rc_car_core::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the control loop or serial link cannot work with
    pub fn validate(&self) -> Result<()> {
        let hz = self.event_loop.target_hz;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::Config(format!(
                "event_loop.target_hz must be a positive number, got {}",
                hz
            )));
        }
        if self.hardware.baud_rate == 0 {
            return Err(Error::Config("hardware.baud_rate must be non-zero".into()));
        }
        if self.hardware.serial_port.is_empty() {
            return Err(Error::Config("hardware.serial_port is empty".into()));
        }
        Ok(())
    }
}
