//! Serial stream abstractions.
//!
//! The driver talks to any byte stream implementing [`SerialPortIO`]; real
//! hardware goes through `tokio_serial::SerialStream` (behind the `serial`
//! feature), tests through an in-memory mock.
//!
//! # Example
//!
//! ```rust,ignore
//! use focuserlink_core::serial::{open_serial_async, drain_serial_buffer};
//!
//! let mut port = open_serial_async("/dev/ttyUSB0", 38400, "FocuserLink").await?;
//! let discarded = drain_serial_buffer(&mut port, 10).await;
//! ```

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - any mock implementing the async I/O traits
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Applies 8N1 with no flow control, which is what the focuser firmware
/// expects.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial stream.
///
/// Reads and discards until nothing arrives within `timeout_ms`, the stream
/// reports EOF, or an error occurs. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    timeout_ms: u64,
) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break, // no more immediate data
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_dyn_serial_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: DynSerial = Box::new(device);
        let mut reader = BufReader::new(port);

        host.write_all(b"q:1234:0\n").await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "q:1234:0\n");
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"R:\nstale").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 8);

        let mut buf = [0u8; 1];
        match tokio::time::timeout(Duration::from_millis(10), device.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => {}
            Ok(Ok(_)) => panic!("Expected no data after drain"),
            Ok(Err(e)) => panic!("Unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_drain_on_quiet_stream_returns_zero() {
        let (_host, mut device) = tokio::io::duplex(64);
        assert_eq!(drain_serial_buffer(&mut device, 5).await, 0);
    }
}
