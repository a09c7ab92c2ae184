//! Serial [`ConnectionProvider`] for real hardware.

use async_trait::async_trait;
use focuserlink_core::capabilities::ConnectionProvider;
use focuserlink_core::serial::{open_serial_async, DynSerial};

/// Opens the focuser's serial port, 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConnection {
    port: String,
    baud_rate: u32,
}

impl SerialConnection {
    /// Connection to `port` at `baud_rate`.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl ConnectionProvider for SerialConnection {
    async fn open(&self) -> anyhow::Result<DynSerial> {
        let stream = open_serial_async(&self.port, self.baud_rate, "FocuserLink").await?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port, self.baud_rate)
    }
}
