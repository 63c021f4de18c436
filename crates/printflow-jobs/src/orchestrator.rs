// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The print-job orchestrator: the state machine that takes a job from
// submission through payment, dispatch, and completion.
//
// State transitions all funnel through `set_status`, and the payment gate
// is checked before any device I/O — an unpaid job is rejected even when
// the target device is unknown or offline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use printflow_core::config::AppConfig;
use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{DeviceDescriptor, JobId, JobStatus, PrintJob, PrintOptions, PrinterStatus};
use printflow_print::registry::{DeviceRegistry, TransferCancel};

use crate::payment::PaymentService;
use crate::repository::{PrintJobRepository, SqliteStore};
use crate::spool::DocumentSpool;

/// Coordinates jobs, payments, the spool, and the device registry.
///
/// Cheap to clone; all fields are shared handles. The background transfer
/// task clones the orchestrator so finalization goes through the same
/// single mutation path as everything else.
#[derive(Clone)]
pub struct JobOrchestrator {
    jobs: Arc<dyn PrintJobRepository>,
    payments: Arc<PaymentService>,
    registry: Arc<DeviceRegistry>,
    spool: Arc<DocumentSpool>,
    /// Cancellation tokens for transfers currently in flight, by job id.
    transfers: Arc<StdMutex<HashMap<JobId, TransferCancel>>>,
    /// Serializes `set_status` so concurrent finalizers (transfer
    /// completion vs. cancellation) see each other's writes.
    status_gate: Arc<StdMutex<()>>,
    /// Interval for device status polling started by `connect_device`.
    poll_interval: Duration,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn PrintJobRepository>,
        payments: Arc<PaymentService>,
        registry: Arc<DeviceRegistry>,
        spool: Arc<DocumentSpool>,
    ) -> Self {
        Self {
            jobs,
            payments,
            registry,
            spool,
            transfers: Arc::new(StdMutex::new(HashMap::new())),
            status_gate: Arc::new(StdMutex::new(())),
            poll_interval: Duration::from_secs(30),
        }
    }

    /// Wire a complete orchestrator from application settings, backed by
    /// the SQLite store at `db_path`.
    pub fn from_config(config: &AppConfig, db_path: impl AsRef<std::path::Path>) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(db_path)?);
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            store.clone(),
            config.demo_payments,
        ));
        let registry = Arc::new(DeviceRegistry::with_discovery_ports(
            config.discovery_ports.clone(),
        ));
        let spool = Arc::new(DocumentSpool::new(config.spool_dir.clone())?);

        let mut orchestrator = Self::new(store, payments, registry, spool);
        orchestrator.poll_interval = Duration::from_secs(config.status_poll_secs);
        Ok(orchestrator)
    }

    /// Register a device and begin polling its status at the configured
    /// interval.
    pub async fn connect_device(&self, descriptor: DeviceDescriptor) -> Result<PrinterStatus> {
        let device_id = descriptor.id.clone();
        let status = self.registry.connect(descriptor).await?;
        self.registry
            .start_status_monitoring(&device_id, self.poll_interval)?;
        Ok(status)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Submit a new job: verify the target device is reachable, spool the
    /// document, and persist the job in `Pending` awaiting payment.
    #[instrument(skip(self, document), fields(bytes = document.len()))]
    pub async fn create_job(
        &self,
        user_id: &str,
        device_id: &str,
        options: PrintOptions,
        document: &[u8],
    ) -> Result<PrintJob> {
        // Reject up front rather than taking payment for an unreachable
        // device.
        self.registry.status(device_id).await?;

        let mut job = PrintJob::new(user_id, device_id, options);
        let file_ref = self.spool.store(&job.id, document)?;
        job.file_ref = Some(file_ref.clone());
        if let Err(e) = self.jobs.create(&job) {
            // Don't leave an orphaned spool file behind a failed insert.
            let _ = self.spool.remove(&file_ref);
            return Err(e);
        }

        info!(job_id = %job.id, cost = job.cost, "job created, awaiting payment");
        Ok(job)
    }

    /// Dispatch a paid job to its device.
    ///
    /// The payment gate comes first: an unpaid job fails with
    /// `PaymentRequired` before any device lookup or I/O. On success the
    /// job moves to `Processing` and the transfer runs in the background;
    /// completion or failure is recorded asynchronously.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn start_printing(&self, job_id: JobId) -> Result<PrintJob> {
        let job = self.require_job(&job_id)?;

        match job.status {
            JobStatus::Pending | JobStatus::Paid => {}
            other => {
                return Err(PrintflowError::State(format!(
                    "job {job_id} cannot be printed from state {other:?}"
                )));
            }
        }

        // The payment service is authoritative; the job status alone does
        // not unlock dispatch.
        if !self.payments.is_paid(&job_id)? {
            return Err(PrintflowError::PaymentRequired(format!(
                "job {job_id} has no settled payment"
            )));
        }

        // Device must be registered and responsive before we commit to
        // `Processing`.
        self.registry.status(&job.device_id).await?;

        let job = self.set_status(&job_id, JobStatus::Processing, None)?;
        tokio::spawn(self.clone().run_transfer(job.clone()));
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// A completed job cannot be cancelled. For a job mid-transfer the
    /// in-flight transfer is flagged and a cancel command is sent to the
    /// device; if the device refuses, the job state is left unchanged and
    /// the device error surfaces to the caller. Should the transfer finish
    /// while the cancel is still talking to the device, the job stays
    /// `Completed` and the final write below fails with `State`.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel_job(&self, job_id: JobId) -> Result<PrintJob> {
        let job = self.require_job(&job_id)?;

        match job.status {
            JobStatus::Completed => {
                return Err(PrintflowError::State(format!(
                    "job {job_id} already completed, cannot cancel"
                )));
            }
            JobStatus::Cancelled => return Ok(job),
            JobStatus::Processing => {
                if let Some(token) = self.take_transfer_token(&job_id) {
                    token.cancel();
                }
                // Best effort at the device; a refusal leaves the job in
                // `Processing`.
                self.registry.cancel_print(&job.device_id).await?;
            }
            JobStatus::Pending | JobStatus::Paid | JobStatus::Failed => {}
        }

        let job = self.set_status(&job_id, JobStatus::Cancelled, None)?;
        if let Some(file_ref) = &job.file_ref {
            let _ = self.spool.remove(file_ref);
        }
        info!("job cancelled");
        Ok(job)
    }

    pub fn job(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        self.jobs.get_by_id(job_id)
    }

    pub fn user_jobs(&self, user_id: &str) -> Result<Vec<PrintJob>> {
        self.jobs.get_by_user(user_id)
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    /// Background half of [`start_printing`]: push the document to the
    /// device and record the outcome.
    async fn run_transfer(self, job: PrintJob) {
        let job_id = job.id;
        let outcome = self.transfer_document(&job).await;
        self.take_transfer_token(&job_id);

        let result = match outcome {
            Ok(()) => {
                if let Some(file_ref) = &job.file_ref {
                    let _ = self.spool.remove(file_ref);
                }
                self.set_status(&job_id, JobStatus::Completed, None)
            }
            Err(message) => self.set_status(&job_id, JobStatus::Failed, Some(&message)),
        };

        match result {
            Ok(_) => {}
            Err(PrintflowError::State(_)) => {
                // The job was cancelled while the transfer settled; the
                // terminal state stands.
                debug!(job_id = %job_id, "transfer outcome superseded by terminal state");
            }
            Err(e) => {
                // The transfer outcome is lost if this fails; log loudly.
                error!(job_id = %job_id, error = %e, "failed to record transfer outcome");
            }
        }
    }

    async fn transfer_document(&self, job: &PrintJob) -> std::result::Result<(), String> {
        let file_ref = job
            .file_ref
            .as_deref()
            .ok_or_else(|| "job has no spooled document".to_string())?;
        let data = self.spool.load(file_ref).map_err(|e| e.to_string())?;

        let handle = self
            .registry
            .print_document(&job.device_id, data)
            .map_err(|e| e.to_string())?;

        self.transfers
            .lock()
            .expect("transfer map lock poisoned")
            .insert(job.id, handle.cancel_token());

        handle.wait().await
    }

    fn take_transfer_token(&self, job_id: &JobId) -> Option<TransferCancel> {
        self.transfers
            .lock()
            .expect("transfer map lock poisoned")
            .remove(job_id)
    }

    fn require_job(&self, job_id: &JobId) -> Result<PrintJob> {
        self.jobs
            .get_by_id(job_id)?
            .ok_or_else(|| PrintflowError::NotFound(format!("job {job_id}")))
    }

    /// Single mutation point for job state.
    ///
    /// Terminal states are final: a write out of `Completed` or `Cancelled`
    /// fails with `State`, and a same-state write is a no-op.  The gate
    /// makes the read-check-write atomic, so when transfer completion and
    /// cancellation race, whichever lands first stands.
    fn set_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<PrintJob> {
        let _gate = self.status_gate.lock().expect("status gate poisoned");
        let mut job = self.require_job(job_id)?;
        let old = job.status;
        if old == status {
            return Ok(job);
        }
        if matches!(old, JobStatus::Completed | JobStatus::Cancelled) {
            return Err(PrintflowError::State(format!(
                "job {job_id} is already {old:?}, cannot move to {status:?}"
            )));
        }
        job.status = status;
        job.error_message = error_message.map(str::to_string);
        job.updated_at = Utc::now();
        self.jobs.update(&job)?;

        if error_message.is_some() {
            warn!(job_id = %job_id, from = ?old, to = ?status, error = ?job.error_message, "job state changed");
        } else {
            debug!(job_id = %job_id, from = ?old, to = ?status, "job state changed");
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{PaymentRepository, SqliteStore};
    use printflow_core::types::{PaymentRecord, PaymentStatus, PrinterProtocol};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn orchestrator() -> (JobOrchestrator, Arc<SqliteStore>, tempfile::TempDir) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open in-memory db"));
        let payments = Arc::new(PaymentService::new(store.clone(), store.clone(), true));
        let registry = Arc::new(DeviceRegistry::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = Arc::new(DocumentSpool::new(dir.path().join("spool")).expect("spool"));
        let orchestrator = JobOrchestrator::new(store.clone(), payments, registry, spool);
        (orchestrator, store, dir)
    }

    fn options() -> PrintOptions {
        PrintOptions {
            copies: 1,
            pages: 1,
            color: false,
            double_sided: false,
        }
    }

    fn seeded_job(store: &SqliteStore, status: JobStatus) -> PrintJob {
        let mut job = PrintJob::new("user-1", "ghost-printer", options());
        job.status = status;
        PrintJobRepository::create(store, &job).expect("insert job");
        job
    }

    fn load_job(store: &SqliteStore, id: &JobId) -> PrintJob {
        PrintJobRepository::get_by_id(store, id)
            .expect("get job")
            .expect("job exists")
    }

    fn seed_settled_payment(store: &SqliteStore, job_id: JobId) {
        let now = Utc::now();
        let record = PaymentRecord {
            id: format!("pay-{job_id}"),
            job_id,
            amount: 2.0,
            status: PaymentStatus::Completed,
            method: "demo".into(),
            transaction_id: "txn-1".into(),
            created_at: now,
            updated_at: now,
        };
        PaymentRepository::create(store, &record).expect("insert payment");
    }

    /// PJL responder good enough for connect + status.
    async fn spawn_fake_printer() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if request.contains("ECHO") {
                            let _ = socket.write_all(b"@PJL ECHO\r\n").await;
                        } else if request.contains("INFO STATUS") {
                            let _ = socket.write_all(b"@PJL INFO STATUS\r\nREADY\r\n").await;
                        }
                    }
                });
            }
        });
        addr
    }

    /// Job store whose insert always fails.
    struct RejectingStore;

    impl PrintJobRepository for RejectingStore {
        fn create(&self, _job: &PrintJob) -> Result<()> {
            Err(PrintflowError::Database("insert job: disk full".into()))
        }
        fn get_by_id(&self, _id: &JobId) -> Result<Option<PrintJob>> {
            Ok(None)
        }
        fn get_by_user(&self, _user_id: &str) -> Result<Vec<PrintJob>> {
            Ok(Vec::new())
        }
        fn update(&self, job: &PrintJob) -> Result<()> {
            Err(PrintflowError::NotFound(format!("job {}", job.id)))
        }
        fn update_status(&self, id: &JobId, _status: JobStatus) -> Result<()> {
            Err(PrintflowError::NotFound(format!("job {id}")))
        }
        fn exists(&self, _id: &JobId) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn create_job_requires_registered_device() {
        let (orchestrator, _store, _dir) = orchestrator();
        let err = orchestrator
            .create_job("user-1", "ghost-printer", options(), b"doc")
            .await
            .unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn unpaid_job_is_rejected_before_any_device_lookup() {
        let (orchestrator, store, _dir) = orchestrator();
        // The device id does not exist in the registry; if the payment gate
        // came second this would fail with NotFound instead.
        let job = seeded_job(&store, JobStatus::Pending);

        let err = orchestrator.start_printing(job.id).await.unwrap_err();
        assert!(matches!(err, PrintflowError::PaymentRequired(_)));

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn paid_job_on_unknown_device_fails_without_state_change() {
        let (orchestrator, store, _dir) = orchestrator();
        let job = seeded_job(&store, JobStatus::Paid);
        seed_settled_payment(&store, job.id);

        let err = orchestrator.start_printing(job.id).await.unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Paid);
    }

    #[tokio::test]
    async fn dispatch_requires_a_settled_payment_record() {
        let (orchestrator, store, _dir) = orchestrator();
        // Status says paid, but no payment record backs it up.
        let job = seeded_job(&store, JobStatus::Paid);

        let err = orchestrator.start_printing(job.id).await.unwrap_err();
        assert!(matches!(err, PrintflowError::PaymentRequired(_)));
        assert_eq!(load_job(&store, &job.id).status, JobStatus::Paid);
    }

    #[tokio::test]
    async fn completed_job_cannot_be_cancelled() {
        let (orchestrator, store, _dir) = orchestrator();
        let job = seeded_job(&store, JobStatus::Completed);

        let err = orchestrator.cancel_job(job.id).await.unwrap_err();
        assert!(matches!(err, PrintflowError::State(_)));

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn pending_job_can_be_cancelled() {
        let (orchestrator, store, _dir) = orchestrator();
        let job = seeded_job(&store, JobStatus::Pending);

        let cancelled = orchestrator.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // Idempotent.
        let again = orchestrator.cancel_job(job.id).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
        assert_eq!(load_job(&store, &job.id).status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn start_printing_unknown_job_is_not_found() {
        let (orchestrator, _store, _dir) = orchestrator();
        let err = orchestrator.start_printing(JobId::new()).await.unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let (orchestrator, store, _dir) = orchestrator();

        let done = seeded_job(&store, JobStatus::Completed);
        let err = orchestrator
            .set_status(&done.id, JobStatus::Cancelled, None)
            .unwrap_err();
        assert!(matches!(err, PrintflowError::State(_)));
        assert_eq!(load_job(&store, &done.id).status, JobStatus::Completed);

        let gone = seeded_job(&store, JobStatus::Cancelled);
        let err = orchestrator
            .set_status(&gone.id, JobStatus::Failed, Some("late failure"))
            .unwrap_err();
        assert!(matches!(err, PrintflowError::State(_)));
        assert_eq!(load_job(&store, &gone.id).status, JobStatus::Cancelled);

        // Same-state writes are no-ops, not errors.
        let again = orchestrator
            .set_status(&gone.id, JobStatus::Cancelled, None)
            .unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn failed_job_insert_cleans_up_spooled_document() {
        let addr = spawn_fake_printer().await;
        let jobs: Arc<dyn PrintJobRepository> = Arc::new(RejectingStore);
        let store = Arc::new(SqliteStore::open_in_memory().expect("open in-memory db"));
        let payments = Arc::new(PaymentService::new(store, jobs.clone(), true));
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .connect(DeviceDescriptor::new(
                "p1",
                "P1",
                addr.ip().to_string(),
                addr.port(),
                PrinterProtocol::Raw,
            ))
            .await
            .unwrap();

        let dir = tempfile::tempdir().expect("tempdir");
        let spool_root = dir.path().join("spool");
        let spool = Arc::new(DocumentSpool::new(spool_root.clone()).expect("spool"));
        let orchestrator = JobOrchestrator::new(jobs, payments, registry, spool);

        let err = orchestrator
            .create_job("user-1", "p1", options(), b"doc")
            .await
            .unwrap_err();
        assert!(matches!(err, PrintflowError::Database(_)));
        assert_eq!(std::fs::read_dir(&spool_root).unwrap().count(), 0);
    }
}
