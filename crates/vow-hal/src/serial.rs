//! Serial link capability.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;
use vow_types::VowError;

/// A byte pipe to a serial device.
///
/// Drivers only need to send bytes and to read whatever is already waiting;
/// port configuration is the concern of the implementation.
pub trait SerialLink: Send {
    /// Device name used in logs and errors, e.g. `"/dev/ttyUSB0"`.
    fn name(&self) -> &str;

    /// Write all of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::HardwareFault`] if the device rejects the write.
    fn write_all(&mut self, data: &[u8]) -> Result<(), VowError>;

    /// Number of inbound bytes waiting to be read.
    fn bytes_to_read(&mut self) -> Result<usize, VowError>;

    /// Read up to `buffer.len()` bytes.  Returns `Ok(0)` when nothing arrived
    /// within the link's read timeout.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, VowError>;
}

/// [`SerialLink`] over a real port opened with the `serialport` crate.
pub struct SerialPortLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    /// Open `path` at `baud_rate`, 8N1 without flow control.
    ///
    /// Any bytes left in the input buffer from a previous session are
    /// discarded so the first read starts clean.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::DeviceUnavailable`] if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, VowError> {
        let unavailable = |e: serialport::Error| VowError::DeviceUnavailable {
            device: path.to_string(),
            details: e.to_string(),
        };
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(unavailable)?;
        port.clear(ClearBuffer::Input).map_err(unavailable)?;

        info!(device = path, baud_rate, "opened serial port");
        Ok(Self {
            name: path.to_string(),
            port,
        })
    }

    fn fault(&self, details: impl std::fmt::Display) -> VowError {
        VowError::HardwareFault {
            component: self.name.clone(),
            details: details.to_string(),
        }
    }
}

impl SerialLink for SerialPortLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), VowError> {
        self.port
            .write_all(data)
            .and_then(|()| self.port.flush())
            .map_err(|e| self.fault(format!("write failed: {e}")))
    }

    fn bytes_to_read(&mut self) -> Result<usize, VowError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| self.fault(format!("cannot query input buffer: {e}")))
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, VowError> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(self.fault(format!("read failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_missing_device_is_device_unavailable() {
        let result = SerialPortLink::open(
            "/dev/vow-no-such-port",
            9600,
            Duration::from_millis(10),
        );
        assert!(matches!(
            result,
            Err(VowError::DeviceUnavailable { device, .. }) if device == "/dev/vow-no-such-port"
        ));
    }
}
