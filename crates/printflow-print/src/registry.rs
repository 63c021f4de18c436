// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Concurrent device registry: device-id → session, per-device transfer
// queues, and status monitoring.
//
// Locking is per entry: the outer map lock is held only for lookups and
// insert/remove, never across device I/O, so slow transfers on one device
// never stall another.  Each device gets exactly one transfer worker, which
// bounds in-flight prints to one per device and preserves submission order.
// The registry is an explicitly constructed value handed to its callers —
// there is no process-global instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{DeviceDescriptor, PrinterStatus, QueuedJob, QueuedJobStatus};
use uuid::Uuid;

use crate::discovery;
use crate::session::DeviceSession;

/// A document transfer queued for a device worker.
struct TransferRequest {
    queued_job_id: Uuid,
    data: Vec<u8>,
    cancelled: Arc<AtomicBool>,
    done: oneshot::Sender<std::result::Result<(), String>>,
}

/// Handle to a dispatched transfer.
///
/// Returned by [`DeviceRegistry::print_document`]; dropping it is fine
/// (fire-and-forget), or the caller can [`wait`](TransferHandle::wait) for
/// the outcome and [`cancel`](TransferHandle::cancel) a transfer that has
/// not started yet.  Cancellation is advisory: a transfer already on the
/// wire runs to completion at the socket level.
#[derive(Debug)]
pub struct TransferHandle {
    pub queued_job_id: Uuid,
    cancelled: Arc<AtomicBool>,
    completion: oneshot::Receiver<std::result::Result<(), String>>,
}

/// Detached cancellation signal for a dispatched transfer.
///
/// Lets a caller keep the ability to cancel while another task consumes the
/// handle itself to await completion.
#[derive(Clone)]
pub struct TransferCancel(Arc<AtomicBool>);

impl TransferCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl TransferHandle {
    /// Flag the transfer as cancelled.  Only effective before the device
    /// worker picks the request up.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Detach a cancellation signal from this handle.
    pub fn cancel_token(&self) -> TransferCancel {
        TransferCancel(Arc::clone(&self.cancelled))
    }

    /// Await the transfer outcome.  The error is the diagnostic message
    /// recorded on the queued job.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err("transfer worker stopped before completion".into()),
        }
    }
}

/// Registry entry: one session, its queue, and its worker.
struct DeviceEntry {
    session: Arc<DeviceSession>,
    queue: Arc<StdMutex<Vec<QueuedJob>>>,
    /// `None` once the worker channel has been closed during disconnect.
    transfer_tx: StdMutex<Option<mpsc::UnboundedSender<TransferRequest>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

/// Concurrent map of connected devices.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<DeviceEntry>>>,
    /// Per-device lifecycle gates.  Concurrent connect/disconnect callers
    /// for one id converge on a single session, while lifecycle I/O on one
    /// device never blocks another.  Not taken by status/print paths.
    gates: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// TCP ports probed by [`discover_printers`](Self::discover_printers).
    discovery_ports: Vec<u16>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_discovery_ports(discovery::PRINTER_PORTS.to_vec())
    }

    pub fn with_discovery_ports(ports: Vec<u16>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            gates: StdMutex::new(HashMap::new()),
            discovery_ports: ports,
        }
    }

    /// Connect a device, or return the existing session's status unchanged
    /// if one is already active for this id (idempotent).
    ///
    /// A fresh session is dialed, self-tested, and queried for its initial
    /// status before it becomes visible to other callers.
    #[instrument(skip(self, descriptor), fields(device_id = %descriptor.id))]
    pub async fn connect(&self, descriptor: DeviceDescriptor) -> Result<PrinterStatus> {
        let gate = self.lifecycle_gate(&descriptor.id);
        let _gate = gate.lock().await;
        let id = descriptor.id.clone();

        if let Some(entry) = self.entry(&id) {
            if entry.session.is_active() {
                debug!("device already connected, reusing session");
                return Ok(entry.session.cached_status());
            }
            // Stale entry from a dropped connection — replace it.
            self.remove_and_drain(&id).await;
        }

        let session = Arc::new(DeviceSession::new(descriptor)?);
        session.connect().await?;

        let status = match session.status().await {
            Ok(status) => status,
            Err(e) => {
                let _ = session.disconnect().await;
                return Err(PrintflowError::Connection(format!(
                    "device {id}: initial status query failed: {e}"
                )));
            }
        };

        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(transfer_worker(
            id.clone(),
            Arc::clone(&session),
            Arc::clone(&queue),
            rx,
        ));

        let entry = Arc::new(DeviceEntry {
            session,
            queue,
            transfer_tx: StdMutex::new(Some(tx)),
            worker: StdMutex::new(Some(worker)),
        });
        self.devices
            .write()
            .expect("device map lock poisoned")
            .insert(id.clone(), entry);

        info!(device_id = %id, status = %status, "device registered");
        Ok(status)
    }

    /// Disconnect and remove a device.  Drains queued transfers first.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        let gate = self.lifecycle_gate(device_id);
        let _gate = gate.lock().await;
        let entry = self
            .remove_and_drain(device_id)
            .await
            .ok_or_else(|| PrintflowError::NotFound(format!("device {device_id}")))?;
        entry.session.disconnect().await?;
        info!(device_id, "device removed from registry");
        Ok(())
    }

    /// Fresh device status.  `NotFound` for unknown ids, `NotConnected` for
    /// registered-but-inactive sessions.
    pub async fn status(&self, device_id: &str) -> Result<PrinterStatus> {
        let entry = self.require_entry(device_id)?;
        entry.session.status().await
    }

    /// Dispatch a document transfer.
    ///
    /// Validates the session synchronously — an unknown or inactive device
    /// fails here with `NotFound`/`NotConnected` and nothing is queued.  On
    /// success a pending [`QueuedJob`] is appended to the device queue, the
    /// transfer is handed to the device worker, and the call returns
    /// immediately with a handle; it never waits for the transfer itself.
    #[instrument(skip(self, document), fields(bytes = document.len()))]
    pub fn print_document(&self, device_id: &str, document: Vec<u8>) -> Result<TransferHandle> {
        let entry = self.require_entry(device_id)?;
        if !entry.session.is_active() {
            return Err(PrintflowError::NotConnected(device_id.to_string()));
        }

        let queued = QueuedJob::new(device_id);
        let queued_job_id = queued.id;
        entry
            .queue
            .lock()
            .expect("queue lock poisoned")
            .push(queued);

        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();
        let request = TransferRequest {
            queued_job_id,
            data: document,
            cancelled: Arc::clone(&cancelled),
            done: done_tx,
        };

        let sent = {
            let tx = entry.transfer_tx.lock().expect("transfer tx lock poisoned");
            match tx.as_ref() {
                Some(tx) => tx.send(request).is_ok(),
                None => false,
            }
        };
        if !sent {
            // Worker already shut down — roll the queue entry back so the
            // failure is fully synchronous.
            entry
                .queue
                .lock()
                .expect("queue lock poisoned")
                .retain(|job| job.id != queued_job_id);
            return Err(PrintflowError::NotConnected(format!(
                "device {device_id}: transfer worker stopped"
            )));
        }

        debug!(device_id, queued_job_id = %queued_job_id, "transfer queued");
        Ok(TransferHandle {
            queued_job_id,
            cancelled,
            completion: done_rx,
        })
    }

    /// Forward a cancel command to the device.  Requires an active session.
    #[instrument(skip(self))]
    pub async fn cancel_print(&self, device_id: &str) -> Result<()> {
        let entry = self.require_entry(device_id)?;
        entry.session.cancel_print().await
    }

    /// Snapshot of the device's queued-transfer records.
    pub fn queue(&self, device_id: &str) -> Result<Vec<QueuedJob>> {
        let entry = self.require_entry(device_id)?;
        let queue = entry.queue.lock().expect("queue lock poisoned");
        Ok(queue.clone())
    }

    /// Scan the local subnet for printers.  Does not mutate the registry.
    pub async fn discover_printers(&self) -> Result<Vec<DeviceDescriptor>> {
        discovery::scan_local_subnet(&self.discovery_ports).await
    }

    /// Poll the device status every `interval`, refreshing the session
    /// cache, until the session goes inactive or is dropped.  The loop
    /// holds only a weak session reference, so a disconnected device never
    /// leaves an orphaned poller behind.
    pub fn start_status_monitoring(&self, device_id: &str, interval: Duration) -> Result<()> {
        let entry = self.require_entry(device_id)?;
        let session = Arc::downgrade(&entry.session);
        let id = device_id.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the initial
            // status from connect stands.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                if !session.is_active() {
                    break;
                }
                if let Err(e) = session.status().await {
                    warn!(device_id = %id, error = %e, "status poll failed");
                }
            }
            debug!(device_id = %id, "status monitor stopped");
        });

        Ok(())
    }

    /// Drain procedure: close every worker channel, wait for in-flight
    /// transfers to finish, and disconnect all sessions.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Arc<DeviceEntry>)> = {
            let mut devices = self.devices.write().expect("device map lock poisoned");
            devices.drain().collect()
        };

        for (id, entry) in entries {
            let gate = self.lifecycle_gate(&id);
            let _gate = gate.lock().await;
            drain_entry(&entry).await;
            if let Err(e) = entry.session.disconnect().await {
                warn!(device_id = %id, error = %e, "disconnect during shutdown failed");
            }
        }
        info!("device registry shut down");
    }

    /// Gate guarding connect/disconnect for one device id.
    fn lifecycle_gate(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .expect("gate map lock poisoned")
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    fn entry(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices
            .read()
            .expect("device map lock poisoned")
            .get(device_id)
            .cloned()
    }

    fn require_entry(&self, device_id: &str) -> Result<Arc<DeviceEntry>> {
        self.entry(device_id)
            .ok_or_else(|| PrintflowError::NotFound(format!("device {device_id}")))
    }

    /// Remove an entry and wait for its worker to finish.
    async fn remove_and_drain(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self
            .devices
            .write()
            .expect("device map lock poisoned")
            .remove(device_id)?;
        drain_entry(&entry).await;
        Some(entry)
    }
}

/// Close the entry's transfer channel and await its worker.
async fn drain_entry(entry: &DeviceEntry) {
    let tx = entry
        .transfer_tx
        .lock()
        .expect("transfer tx lock poisoned")
        .take();
    drop(tx);

    let worker = entry.worker.lock().expect("worker lock poisoned").take();
    if let Some(worker) = worker {
        let _ = worker.await;
    }
}

/// Per-device transfer worker: processes queued transfers one at a time,
/// updating the matching [`QueuedJob`] in place and resolving the caller's
/// handle.  Exits when the registry closes the channel.
async fn transfer_worker(
    device_id: String,
    session: Arc<DeviceSession>,
    queue: Arc<StdMutex<Vec<QueuedJob>>>,
    mut rx: mpsc::UnboundedReceiver<TransferRequest>,
) {
    while let Some(request) = rx.recv().await {
        if request.cancelled.load(Ordering::SeqCst) {
            debug!(device_id = %device_id, queued_job_id = %request.queued_job_id, "transfer cancelled before dispatch");
            set_queued_status(&queue, request.queued_job_id, QueuedJobStatus::Failed);
            let _ = request.done.send(Err("transfer cancelled before dispatch".into()));
            continue;
        }

        match session.print(&request.data).await {
            Ok(()) => {
                set_queued_status(&queue, request.queued_job_id, QueuedJobStatus::Completed);
                info!(device_id = %device_id, queued_job_id = %request.queued_job_id, "transfer completed");
                let _ = request.done.send(Ok(()));
            }
            Err(e) => {
                set_queued_status(&queue, request.queued_job_id, QueuedJobStatus::Failed);
                warn!(device_id = %device_id, queued_job_id = %request.queued_job_id, error = %e, "transfer failed");
                let _ = request.done.send(Err(e.to_string()));
            }
        }
    }
    debug!(device_id = %device_id, "transfer worker stopped");
}

fn set_queued_status(queue: &StdMutex<Vec<QueuedJob>>, id: Uuid, status: QueuedJobStatus) {
    let mut queue = queue.lock().expect("queue lock poisoned");
    if let Some(job) = queue.iter_mut().find(|job| job.id == id) {
        job.status = status;
    }
}
