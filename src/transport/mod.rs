//! Transport layer for I/O abstraction
//!
//! The serial I/O thread talks to the device through [`Transport`], so the
//! link can run over a real port ([`SerialTransport`]) or an in-memory
//! double ([`MockTransport`]) in tests and bench setups.

use crate::error::Result;

mod mock;
mod serial;
pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 on timeout)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Drop any input received so far
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Write the whole buffer, retrying short writes
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            data = &data[n..];
        }
        Ok(())
    }
}
