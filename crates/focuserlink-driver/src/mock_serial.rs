//! Scriptable in-memory serial stream for exercising the driver without hardware.
//!
//! [`new`] returns a connected pair:
//! - [`MockSerialPort`]: handed to the driver, implements `AsyncRead + AsyncWrite`
//! - [`MockDeviceHarness`]: kept by the test, plays the focuser
//!
//! ```rust,ignore
//! let (port, mut device) = mock_serial::new();
//! let mut link = LineLink::new(Box::new(port));
//!
//! let app = tokio::spawn(async move { link.query(&Command::status()).await });
//! device.expect_command("q").await;
//! device.reply("q:1234:0").unwrap();
//! ```
//!
//! Expectation failures panic, as they are test assertions.

#![allow(clippy::panic, clippy::expect_used)]

use async_trait::async_trait;
use focuserlink_core::capabilities::ConnectionProvider;
use focuserlink_core::serial::DynSerial;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How long the harness waits for the driver to write before failing a test.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Driver-facing side of the mock stream.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test-facing side: asserts on what the driver wrote and feeds responses.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

/// Create a connected port/harness pair.
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (driver_to_device_tx, driver_to_device_rx) = mpsc::unbounded_channel();
    let (device_to_driver_tx, device_to_driver_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: driver_to_device_tx,
        reads_rx: device_to_driver_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: driver_to_device_rx,
        reads_tx: device_to_driver_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // harness dropped: end-of-file
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Send raw bytes to the driver.
    ///
    /// # Errors
    /// Returns error if the driver side has been dropped.
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: driver port disconnected")
    }

    /// Send one response line; the terminator is appended.
    ///
    /// # Errors
    /// Returns error if the driver side has been dropped.
    pub fn reply(&self, line: &str) -> Result<(), &'static str> {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.send_response(&data)
    }

    /// Wait until the driver has written `expected` and assert on it.
    ///
    /// Excess bytes stay buffered for the next expectation.
    ///
    /// # Panics
    /// Panics if nothing matching arrives within two seconds.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match tokio::time::timeout(EXPECT_TIMEOUT, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Driver-side port closed while expecting a write."),
                Err(_) => panic!(
                    "Timeout waiting for write. Expected `{:?}`, received `{:?}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer),
                ),
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Wait for one command line (terminator appended to `command`).
    pub async fn expect_command(&mut self, command: &str) {
        let mut line = command.as_bytes().to_vec();
        line.push(b'\n');
        self.expect_write(&line).await;
    }

    /// Expect a write and send a raw response.
    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        self.send_response(response)
            .expect("Failed to send response");
    }

    /// Expect a command line and reply with one response line.
    pub async fn exchange(&mut self, command: &str, response: &str) {
        self.expect_command(command).await;
        self.reply(response).expect("Failed to send response");
    }

    /// Whether the driver has written nothing since the last expectation,
    /// waiting up to `window` for late writes.
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        if !self.write_buffer.is_empty() {
            return false;
        }
        match tokio::time::timeout(window, self.writes_rx.recv()).await {
            Ok(Some(chunk)) => {
                self.write_buffer.extend_from_slice(&chunk);
                false
            }
            Ok(None) | Err(_) => true,
        }
    }

    /// Wait up to `window` for the driver to drop its port, discarding
    /// anything it writes meanwhile. Returns whether the port was dropped.
    pub async fn wait_closed(&mut self, window: Duration) -> bool {
        self.write_buffer.clear();
        tokio::time::timeout(window, async {
            while self.writes_rx.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }
}

/// [`ConnectionProvider`] handing out one pre-built mock port.
#[derive(Debug)]
pub struct MockConnection {
    port: parking_lot::Mutex<Option<MockSerialPort>>,
}

impl MockConnection {
    /// Provider for `port`. A second `open` fails.
    pub fn new(port: MockSerialPort) -> Self {
        Self {
            port: parking_lot::Mutex::new(Some(port)),
        }
    }
}

#[async_trait]
impl ConnectionProvider for MockConnection {
    async fn open(&self) -> anyhow::Result<DynSerial> {
        let port = self
            .port
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("mock port already opened"))?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_command_response() {
        let (port, mut device) = new();
        let mut port = BufReader::new(port);

        let app = tokio::spawn(async move {
            port.write_all(b"#\n").await.unwrap();
            let mut response = String::new();
            port.read_line(&mut response).await.unwrap();
            response
        });

        device.exchange("#", "#:FocuserLink").await;
        assert_eq!(app.await.unwrap(), "#:FocuserLink\n");
    }

    #[tokio::test]
    async fn test_split_writes_are_reassembled() {
        let (mut port, mut device) = new();

        port.write_all(b"R:0:").await.unwrap();
        port.write_all(b"5050\n").await.unwrap();

        device.expect_command("R:0:5050").await;
        assert!(device.is_quiet(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_closed_sees_dropped_port() {
        let (mut port, mut device) = new();
        port.write_all(b"q\n").await.unwrap();
        assert!(!device.wait_closed(Duration::from_millis(20)).await);

        drop(port);
        assert!(device.wait_closed(Duration::from_millis(200)).await);
    }
}
