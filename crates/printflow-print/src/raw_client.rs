// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP print client (JetDirect, port 9100) with PJL command support.
//
// The workhorse protocol: open a TCP socket, talk PJL for status and job
// control, and stream document bytes directly.  The printer must interpret
// the document format natively — there is no negotiation beyond the PJL
// language switch.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::PrinterStatus;

use crate::pjl;

/// Timeout for the initial TCP dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline applied to every individual read and write so a hung device
/// cannot block the caller indefinitely.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Document bytes are streamed in chunks of this size.
const CHUNK_SIZE: usize = 8192;

/// Maximum PJL response we will read for a single command.
const RESPONSE_BUF: usize = 1024;

/// Raw TCP client bound to one device address.
pub struct RawClient {
    addr: String,
    stream: Option<TcpStream>,
}

impl RawClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    /// Dial the device.  Bounded by [`DIAL_TIMEOUT`].
    pub async fn connect(&mut self) -> Result<()> {
        debug!(addr = %self.addr, "dialing raw printer");
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                PrintflowError::Connection(format!(
                    "dial {} timed out after {}s",
                    self.addr,
                    DIAL_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| PrintflowError::Connection(format!("dial {}: {e}", self.addr)))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the connection.  Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // Best effort — the peer may already be gone.
            let _ = stream.shutdown().await;
            debug!(addr = %self.addr, "raw connection closed");
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        let addr = self.addr.clone();
        self.stream
            .as_mut()
            .ok_or(PrintflowError::NotConnected(addr))
    }

    /// Send a framed PJL command without awaiting a response.
    async fn write_frame(&mut self, command: &str) -> Result<()> {
        let frame = pjl::frame(command);
        let addr = self.addr.clone();
        let stream = self.stream_mut()?;
        tokio::time::timeout(IO_TIMEOUT, stream.write_all(&frame))
            .await
            .map_err(|_| PrintflowError::Connection(format!("write to {addr} timed out")))?
            .map_err(|e| PrintflowError::Connection(format!("write to {addr}: {e}")))?;
        Ok(())
    }

    /// Send a framed PJL command and read one response (≤ 1 KiB).
    async fn send_command(&mut self, command: &str) -> Result<String> {
        self.write_frame(command).await?;

        let addr = self.addr.clone();
        let stream = self.stream_mut()?;
        let mut buf = [0u8; RESPONSE_BUF];
        let n = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| PrintflowError::Connection(format!("read from {addr} timed out")))?
            .map_err(|e| PrintflowError::Connection(format!("read from {addr}: {e}")))?;

        if n == 0 {
            return Err(PrintflowError::Connection(format!(
                "device {addr} closed the connection"
            )));
        }

        // Vendor status text is not guaranteed to be valid UTF-8.
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// PJL ECHO self-test: the reply must contain the `ECHO` token, otherwise
    /// we are talking to something that is not a PJL printer.
    pub async fn echo_test(&mut self) -> Result<()> {
        let response = self.send_command(pjl::ECHO).await?;
        if !response.contains("ECHO") {
            return Err(PrintflowError::Protocol(format!(
                "invalid echo response from {}",
                self.addr
            )));
        }
        Ok(())
    }

    /// Query device status via `INFO STATUS` and parse the free-form reply.
    pub async fn query_status(&mut self) -> Result<PrinterStatus> {
        let response = self.send_command(pjl::INFO_STATUS).await?;
        Ok(PrinterStatus::parse(&response))
    }

    /// Stream a document: `ENTER LANGUAGE=PCL`, the raw bytes in 8 KiB
    /// chunks, then `EOJ`.
    pub async fn print(&mut self, document: &[u8]) -> Result<()> {
        self.write_frame(pjl::ENTER_PCL).await?;

        let addr = self.addr.clone();
        let total = document.len();
        let mut sent = 0usize;
        for chunk in document.chunks(CHUNK_SIZE) {
            let stream = self.stream_mut()?;
            tokio::time::timeout(IO_TIMEOUT, stream.write_all(chunk))
                .await
                .map_err(|_| {
                    PrintflowError::Connection(format!(
                        "document write to {addr} timed out at byte {sent}"
                    ))
                })?
                .map_err(|e| {
                    PrintflowError::Connection(format!(
                        "document write to {addr} failed at byte {sent}: {e}"
                    ))
                })?;
            sent += chunk.len();
            debug!(sent, total, "raw transfer progress");
        }

        self.write_frame(pjl::EOJ).await?;

        let stream = self.stream_mut()?;
        tokio::time::timeout(IO_TIMEOUT, stream.flush())
            .await
            .map_err(|_| PrintflowError::Connection(format!("flush to {addr} timed out")))?
            .map_err(|e| PrintflowError::Connection(format!("flush to {addr}: {e}")))?;

        info!(addr = %self.addr, total, "document sent via raw TCP");
        Ok(())
    }

    /// Send `CANCEL`.  Advisory only: no acknowledgement is awaited and an
    /// in-flight page may still complete on the device.
    pub async fn cancel(&mut self) -> Result<()> {
        self.write_frame(pjl::CANCEL).await
    }
}
