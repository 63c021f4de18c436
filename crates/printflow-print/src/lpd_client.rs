// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPD/LPR client (RFC 1179) for legacy printers on port 515.
//
// Connect is a plain TCP viability check; printing implements the minimal
// receive-job exchange: send a control file (metadata), then the data file
// (document bytes), each acknowledged with a single zero byte.  LPD has no
// status or cancel operation in this exchange, so those are stubs.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::PrinterStatus;

/// Timeout for the initial TCP dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for each read/write in the job exchange.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue name used in the receive-job command.
const DEFAULT_QUEUE: &str = "lp";

/// Host name written into LPD control files.
const CLIENT_HOST: &str = "printflow";

/// LPD client bound to one device address.
pub struct LpdClient {
    addr: String,
    stream: Option<TcpStream>,
}

impl LpdClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    /// Dial the device.  A successful dial is the whole viability check.
    pub async fn connect(&mut self) -> Result<()> {
        debug!(addr = %self.addr, "dialing LPD printer");
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
            let _ = stream.shutdown().await;
            debug!(addr = %self.addr, "LPD connection closed");
        }
        Ok(())
    }

    /// LPD has no in-band status query here.
    pub async fn query_status(&mut self) -> Result<PrinterStatus> {
        if self.stream.is_none() {
            return Err(PrintflowError::NotConnected(self.addr.clone()));
        }
        Ok(PrinterStatus::Unknown)
    }

    /// Send a document via the RFC 1179 receive-job exchange.
    pub async fn print(&mut self, document: &[u8]) -> Result<()> {
        let addr = self.addr.clone();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PrintflowError::NotConnected(addr.clone()))?;

        // 0x02 <queue> LF — receive a printer job.
        let cmd = format!("\x02{DEFAULT_QUEUE}\n");
        write_checked(stream, cmd.as_bytes(), &addr, "job request").await?;
        read_ack(stream, &addr, "job request").await?;

        let job_num = 1; // single-job connection, no sequence tracking
        let control_file = format!(
            "H{CLIENT_HOST}\nP{CLIENT_HOST}\nJprintflow\nldfA{job_num:03}{CLIENT_HOST}\nUdfA{job_num:03}{CLIENT_HOST}\nNprintflow\n"
        );

        // 0x02 <len> cfA<nnn><host> LF — control file header, then content.
        let cf_header = format!("\x02{} cfA{:03}{}\n", control_file.len(), job_num, CLIENT_HOST);
        write_checked(stream, cf_header.as_bytes(), &addr, "control header").await?;
        read_ack(stream, &addr, "control header").await?;
        write_checked(stream, control_file.as_bytes(), &addr, "control file").await?;
        write_checked(stream, &[0], &addr, "control terminator").await?;
        read_ack(stream, &addr, "control file").await?;

        // 0x03 <len> dfA<nnn><host> LF — data file header, then the document.
        let df_header = format!("\x03{} dfA{:03}{}\n", document.len(), job_num, CLIENT_HOST);
        write_checked(stream, df_header.as_bytes(), &addr, "data header").await?;
        read_ack(stream, &addr, "data header").await?;
        write_checked(stream, document, &addr, "data file").await?;
        write_checked(stream, &[0], &addr, "data terminator").await?;
        read_ack(stream, &addr, "data file").await?;

        info!(addr = %self.addr, total = document.len(), "document sent via LPD");
        Ok(())
    }

    /// LPD offers no job abort on this connection; log and carry on.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(PrintflowError::NotConnected(self.addr.clone()));
        }
        warn!(addr = %self.addr, "cancel requested but LPD has no abort command");
        Ok(())
    }
}

async fn write_checked(stream: &mut TcpStream, bytes: &[u8], addr: &str, what: &str) -> Result<()> {
    tokio::time::timeout(IO_TIMEOUT, stream.write_all(bytes))
        .await
        .map_err(|_| PrintflowError::Connection(format!("LPD {what} to {addr} timed out")))?
        .map_err(|e| PrintflowError::Connection(format!("LPD {what} to {addr}: {e}")))?;
    Ok(())
}

/// Read the single-byte acknowledgement; non-zero means the printer
/// rejected the preceding block.
async fn read_ack(stream: &mut TcpStream, addr: &str, what: &str) -> Result<()> {
    let mut ack = [0u8; 1];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut ack))
        .await
        .map_err(|_| PrintflowError::Connection(format!("LPD {what} ack from {addr} timed out")))?
        .map_err(|e| PrintflowError::Connection(format!("LPD {what} ack from {addr}: {e}")))?;

    if ack[0] != 0 {
        return Err(PrintflowError::Protocol(format!(
            "LPD printer {addr} rejected {what} (ack {})",
            ack[0]
        )));
    }
    Ok(())
}
