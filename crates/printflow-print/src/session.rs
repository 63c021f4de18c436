// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One live connection to one printer.
//
// A session wraps exactly one protocol client and serializes every command
// against it — interleaved I/O on a single socket is never safe.  The
// registry owns sessions and enforces one per device id; the session itself
// only guards its own socket.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{DeviceDescriptor, PrinterStatus};

use crate::protocol::ProtocolClient;

/// A live device connection with serialized command access.
pub struct DeviceSession {
    descriptor: DeviceDescriptor,
    /// All I/O goes through this lock, one command at a time.
    client: Mutex<ProtocolClient>,
    active: AtomicBool,
    last_status: StdMutex<PrinterStatus>,
}

impl DeviceSession {
    /// Build a session for a descriptor.  Does not connect.
    pub fn new(descriptor: DeviceDescriptor) -> Result<Self> {
        let client = ProtocolClient::for_descriptor(&descriptor)?;
        Ok(Self {
            descriptor,
            client: Mutex::new(client),
            active: AtomicBool::new(false),
            last_status: StdMutex::new(PrinterStatus::Unknown),
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Last status observed on this session.
    pub fn cached_status(&self) -> PrinterStatus {
        *self.last_status.lock().expect("status lock poisoned")
    }

    /// Dial the device and run the protocol self-test.
    ///
    /// Fails with `Connection` if already active — idempotent reconnects are
    /// the registry's job, not the session's.  A failed self-test tears the
    /// half-open socket down before surfacing the error, so the session is
    /// never left active with an unverified connection.
    pub async fn connect(&self) -> Result<()> {
        if self.is_active() {
            return Err(PrintflowError::Connection(format!(
                "device {} is already connected",
                self.descriptor.id
            )));
        }

        let mut client = self.client.lock().await;
        client.connect().await.map_err(|e| {
            PrintflowError::Connection(format!("device {}: {e}", self.descriptor.id))
        })?;

        if let Err(e) = client.self_test().await {
            warn!(device_id = %self.descriptor.id, error = %e, "self-test failed, tearing down");
            let _ = client.disconnect().await;
            return Err(PrintflowError::Connection(format!(
                "device {} failed connection self-test: {e}",
                self.descriptor.id
            )));
        }

        self.active.store(true, Ordering::SeqCst);
        info!(
            device_id = %self.descriptor.id,
            addr = %self.descriptor.socket_addr(),
            protocol = %self.descriptor.protocol,
            "device session established"
        );
        Ok(())
    }

    /// Close the connection.  Safe to call when already inactive.
    pub async fn disconnect(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        self.active.store(false, Ordering::SeqCst);
        client.disconnect().await?;
        debug!(device_id = %self.descriptor.id, "device session closed");
        Ok(())
    }

    /// Refresh the device status and cache it on the session.
    pub async fn status(&self) -> Result<PrinterStatus> {
        self.ensure_active()?;
        let mut client = self.client.lock().await;
        let status = client.query_status().await?;
        *self.last_status.lock().expect("status lock poisoned") = status;
        Ok(status)
    }

    /// Transfer document bytes to the device.
    pub async fn print(&self, document: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let mut client = self.client.lock().await;
        client.print(document).await
    }

    /// Best-effort cancel: the command is sent, but no device
    /// acknowledgement is awaited and an in-flight transfer holding the
    /// command lock finishes first.
    pub async fn cancel_print(&self) -> Result<()> {
        self.ensure_active()?;
        let mut client = self.client.lock().await;
        client.cancel().await
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(PrintflowError::NotConnected(self.descriptor.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printflow_core::types::PrinterProtocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// PJL responder; `echo_ok` controls whether the self-test passes.
    async fn spawn_fake_printer(echo_ok: bool) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if request.contains("ECHO") {
                            let reply: &[u8] = if echo_ok {
                                b"@PJL ECHO\r\n"
                            } else {
                                b"NAK\r\n"
                            };
                            let _ = socket.write_all(reply).await;
                        } else if request.contains("INFO STATUS") {
                            let _ = socket.write_all(b"@PJL INFO STATUS\r\nREADY\r\n").await;
                        }
                    }
                });
            }
        });
        addr
    }

    fn descriptor(addr: std::net::SocketAddr) -> DeviceDescriptor {
        DeviceDescriptor::new(
            "p1",
            "Test Printer",
            addr.ip().to_string(),
            addr.port(),
            PrinterProtocol::Raw,
        )
    }

    #[tokio::test]
    async fn connect_then_status() {
        let addr = spawn_fake_printer(true).await;
        let session = DeviceSession::new(descriptor(addr)).unwrap();

        session.connect().await.unwrap();
        assert!(session.is_active());
        assert_eq!(session.status().await.unwrap(), PrinterStatus::Ready);
        assert_eq!(session.cached_status(), PrinterStatus::Ready);

        session.disconnect().await.unwrap();
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn failed_self_test_leaves_session_inactive() {
        let addr = spawn_fake_printer(false).await;
        let session = DeviceSession::new(descriptor(addr)).unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, PrintflowError::Connection(_)));
        assert!(!session.is_active());

        // And operations on the torn-down session fail cleanly.
        let err = session.status().await.unwrap_err();
        assert!(matches!(err, PrintflowError::NotConnected(_)));
    }

    #[tokio::test]
    async fn double_connect_is_rejected() {
        let addr = spawn_fake_printer(true).await;
        let session = DeviceSession::new(descriptor(addr)).unwrap();

        session.connect().await.unwrap();
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, PrintflowError::Connection(_)));
    }

    #[tokio::test]
    async fn print_requires_active_session() {
        let addr = spawn_fake_printer(true).await;
        let session = DeviceSession::new(descriptor(addr)).unwrap();

        let err = session.print(b"document").await.unwrap_err();
        assert!(matches!(err, PrintflowError::NotConnected(_)));
    }
}
