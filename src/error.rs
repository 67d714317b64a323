//! Error types for the RC car core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// RC car error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Invalid frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Checksum mismatch
    #[error("Checksum error: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumError {
        /// Expected checksum value
        expected: u8,
        /// Actual checksum value
        actual: u8,
    },

    /// Event loop started while already running
    #[error("Loop cannot be run multiple times at once")]
    AlreadyRunning,

    /// Event loop started with no handlers registered
    #[error("Loop cannot be run with nothing to do")]
    NothingToRun,

    /// Handler lists mutated while the loop is running
    #[error("Loop state cannot be altered while it's running")]
    LoopRunning,

    /// AI handler reported a failure
    #[error("AI handler '{handler}' failed: {reason}")]
    Handler {
        /// Handler name
        handler: String,
        /// Failure description
        reason: String,
    },

    /// Serial link is not functional (port failed to open or link closed)
    #[error("Serial link unavailable")]
    LinkUnavailable,

    /// Thread could not be spawned
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Thread panicked before it could be joined
    #[error("Thread panicked: {0}")]
    ThreadPanic(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a handler failure
    pub fn handler(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Handler {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}
