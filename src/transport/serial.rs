//! Serial port transport for the sensor module

use super::Transport;
use crate::error::Result;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// UART link to the sensor module (8N1, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`.
    ///
    /// Reads block for at most `read_timeout` and then report 0 bytes.
    /// Opening the port resets the sensor module's microcontroller.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        log::info!(
            "Opened serial port {} at {} baud (read timeout {}ms)",
            path,
            baud_rate,
            read_timeout.as_millis()
        );

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        let pending = self.port.bytes_to_read()?;
        if pending > 0 {
            log::debug!("{}: discarding {} bytes of boot output", self.path, pending);
        }
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
