//! Line transport: one command line out, at most one response line back.
//!
//! The link owns the stream, so exclusive access is enforced by `&mut self`;
//! the driver keeps the link inside its session mutex so the poller and user
//! commands never interleave on the wire.

use crate::protocol::{Command, MAX_LINE_LEN, RESPONSE_TIMEOUT, TERMINATOR};
use crate::record::Record;
use focuserlink_core::error::LinkError;
use focuserlink_core::serial::{drain_serial_buffer, DynSerial};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// Whether an exchange waits for a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Read and echo-check one response line
    Response,
    /// Write and flush only; completion is observed by polling
    Nothing,
}

/// Newline-framed command/response link.
pub struct LineLink {
    port: BufReader<DynSerial>,
    timeout: Duration,
    drain_ms: u64,
}

impl LineLink {
    /// Default window for discarding stale input around an exchange.
    pub const DEFAULT_DRAIN_MS: u64 = 10;

    /// Wrap a stream with the default read budget.
    pub fn new(port: DynSerial) -> Self {
        Self::with_timeouts(port, RESPONSE_TIMEOUT, Self::DEFAULT_DRAIN_MS)
    }

    /// Wrap a stream with a custom read budget and drain window.
    pub fn with_timeouts(port: DynSerial, timeout: Duration, drain_ms: u64) -> Self {
        Self {
            port: BufReader::with_capacity(MAX_LINE_LEN, port),
            timeout,
            drain_ms,
        }
    }

    /// Send `command` and, if asked, read and validate its response.
    ///
    /// Exactly one write and at most one read. Stale input is discarded
    /// before the write and again before returning, so leftovers from a
    /// previous exchange cannot corrupt this one or the next.
    pub async fn exchange(
        &mut self,
        command: &Command,
        expect: Expect,
    ) -> Result<Option<Record>, LinkError> {
        self.flush_input().await;

        tracing::debug!(cmd = %command, "CMD");
        self.port.get_mut().write_all(&command.encode()).await?;
        self.port.get_mut().flush().await?;

        if expect == Expect::Nothing {
            self.flush_input().await;
            return Ok(None);
        }

        let read = self.read_line(command.tag()).await;
        self.flush_input().await;
        let line = read?;

        tracing::debug!(res = %line, "RES");

        let received = match line.chars().next() {
            Some(c) => c,
            None => {
                return Err(LinkError::EmptyResponse {
                    verb: command.tag(),
                })
            }
        };
        if received != command.tag() {
            return Err(LinkError::EchoMismatch {
                expected: command.tag(),
                received,
            });
        }

        Ok(Some(Record::parse(&line)))
    }

    /// Send `command` and return its validated response record.
    pub async fn query(&mut self, command: &Command) -> Result<Record, LinkError> {
        match self.exchange(command, Expect::Response).await? {
            Some(record) => Ok(record),
            None => Err(LinkError::EmptyResponse {
                verb: command.tag(),
            }),
        }
    }

    /// Send `command` without waiting for a response.
    pub async fn send(&mut self, command: &Command) -> Result<(), LinkError> {
        self.exchange(command, Expect::Nothing).await.map(|_| ())
    }

    async fn read_line(&mut self, verb: char) -> Result<String, LinkError> {
        let budget = self.timeout;
        let port = &mut self.port;
        let mut buf = Vec::with_capacity(MAX_LINE_LEN);

        let result = tokio::time::timeout(budget, async {
            let mut limited = (&mut *port).take(MAX_LINE_LEN as u64);
            limited.read_until(TERMINATOR, &mut buf).await
        })
        .await;

        match result {
            Err(_) => Err(LinkError::Timeout {
                verb,
                after: budget,
            }),
            Ok(Err(e)) => Err(LinkError::Io(e)),
            Ok(Ok(0)) => Err(LinkError::Closed),
            Ok(Ok(_)) => {
                if buf.last() == Some(&TERMINATOR) {
                    buf.pop();
                    Ok(String::from_utf8_lossy(&buf).into_owned())
                } else if buf.len() >= MAX_LINE_LEN {
                    Err(LinkError::ResponseTooLong { max: MAX_LINE_LEN })
                } else {
                    Err(LinkError::Closed)
                }
            }
        }
    }

    async fn flush_input(&mut self) {
        let buffered = self.port.buffer().len();
        if buffered > 0 {
            Pin::new(&mut self.port).consume(buffered);
        }
        let drained = drain_serial_buffer(self.port.get_mut(), self.drain_ms).await;
        if buffered + drained > 0 {
            tracing::trace!(discarded = buffered + drained, "Discarded stale input");
        }
    }
}
