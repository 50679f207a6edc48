//! Async serial port implementation using tokio-serial.

use super::error::PortError;
use super::traits::{AsyncSerialPortAdapter, PortConfiguration};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Native async serial port backed by a `tokio_serial::SerialStream`.
pub struct TokioSerialPort {
    /// The underlying tokio-serial stream.
    inner: tokio_serial::SerialStream,
    /// Line settings for reference.
    config: PortConfiguration,
    /// Port name/path for identification.
    name: String,
}

impl TokioSerialPort {
    /// Open a serial port at the configured baud rate, 8N1, no flow control.
    ///
    /// # Example
    /// ```no_run
    /// use energymeter_link::port::{PortConfiguration, TokioSerialPort};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let port = TokioSerialPort::open("/dev/ttyACM0", &PortConfiguration::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(port_name: &str, config: &PortConfiguration) -> Result<Self, PortError> {
        let builder = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None);

        let inner = tokio_serial::SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => PortError::not_found(port_name),
            tokio_serial::ErrorKind::InvalidInput => PortError::config(e.to_string()),
            _ => PortError::Io(std::io::Error::other(e.to_string())),
        })?;

        Ok(Self {
            inner,
            config: *config,
            name: port_name.to_string(),
        })
    }
}

#[async_trait]
impl AsyncSerialPortAdapter for TokioSerialPort {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let written = self.inner.write(data).await.map_err(PortError::Io)?;
        self.inner.flush().await.map_err(PortError::Io)?;
        Ok(written)
    }

    async fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.inner.read(buffer).await.map_err(PortError::Io)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &PortConfiguration {
        &self.config
    }
}

impl std::fmt::Debug for TokioSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSerialPort")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
