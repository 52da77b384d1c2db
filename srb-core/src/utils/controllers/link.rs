//! Physical links to the microcontroller.
//!
//! A `SerialLink` only knows how to push one already formatted line. Range
//! handling and ordering live in [`SerialChannel`](super::SerialChannel).

use std::{
    io::{self, Write},
    time::Duration,
};

use serialport::SerialPort;

use crate::utils::errors::SerialError;

/// Write timeout for the serial device.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound line sink towards the microcontroller.
pub trait SerialLink: Send + 'static {
    /// Write one newline-terminated line. A failure leaves the link in an
    /// unknown state.
    fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        (**self).write_line(line)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// A real serial device (Arduino on `/dev/ttyACM0`, motor driver, ...).
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    pub fn open(
        device: &str,
        baud: u32,
    ) -> Result<Self, SerialError> {
        let port = serialport::new(device, baud)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|source| SerialError::Open {
                device: device.into(),
                baud,
                source,
            })?;
        tracing::info!(device, baud, "serial device opened");
        Ok(SerialPortLink { port })
    }
}

impl SerialLink for SerialPortLink {
    fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        self.port.write_all(line)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Dry-run link that logs every line instead of touching hardware.
#[derive(Debug, Default)]
pub struct LoggingLink;

impl SerialLink for LoggingLink {
    fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        tracing::info!(line = %String::from_utf8_lossy(line).trim_end(), "serial tx (dry run)");
        Ok(())
    }
}
