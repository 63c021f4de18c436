// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payment processing for print jobs.
//
// The payment gateway is authoritative: job dispatch only ever consults the
// persisted payment record, and only a `Completed` payment unlocks printing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{JobId, JobStatus, PaymentRecord, PaymentStatus};

use crate::repository::{PaymentRepository, PrintJobRepository};

/// Creates and settles payment records for print jobs.
///
/// In demo mode payments settle immediately; otherwise settlement arrives
/// asynchronously through [`PaymentService::process_callback`] from an
/// external gateway.
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    jobs: Arc<dyn PrintJobRepository>,
    demo_mode: bool,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        jobs: Arc<dyn PrintJobRepository>,
        demo_mode: bool,
    ) -> Self {
        Self {
            payments,
            jobs,
            demo_mode,
        }
    }

    /// Take a payment for the given job.
    ///
    /// Demo mode settles synchronously and marks the job `Paid` before
    /// returning. Without a configured gateway, non-demo payments are
    /// rejected.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn process_payment(&self, job_id: JobId, amount: f64) -> Result<PaymentRecord> {
        if !self.jobs.exists(&job_id)? {
            return Err(PrintflowError::NotFound(format!("job {job_id}")));
        }

        if !self.demo_mode {
            return Err(PrintflowError::State(
                "no payment gateway configured; enable demo mode or wire a gateway".into(),
            ));
        }

        let now = Utc::now();
        let record = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            job_id,
            amount,
            status: PaymentStatus::Completed,
            method: "demo".into(),
            transaction_id: format!("demo_{}", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
        };
        self.payments.create(&record)?;
        self.jobs.update_status(&job_id, JobStatus::Paid)?;

        info!(payment_id = %record.id, amount, "demo payment settled");
        Ok(record)
    }

    /// Latest payment record for a job, if any.
    pub fn payment_status(&self, job_id: &JobId) -> Result<Option<PaymentRecord>> {
        self.payments.get_by_job_id(job_id)
    }

    /// True when the job has a settled payment.
    pub fn is_paid(&self, job_id: &JobId) -> Result<bool> {
        Ok(self
            .payments
            .get_by_job_id(job_id)?
            .is_some_and(|p| p.status == PaymentStatus::Completed))
    }

    /// Apply a settlement notification from the payment gateway.
    ///
    /// On `Completed` the associated job advances to `Paid`; a `Failed`
    /// settlement leaves the job untouched so the user can retry.
    #[instrument(skip(self, transaction_id))]
    pub fn process_callback(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> Result<PaymentRecord> {
        let mut record = self
            .payments
            .get_by_id(payment_id)?
            .ok_or_else(|| PrintflowError::NotFound(format!("payment {payment_id}")))?;

        record.status = status;
        if let Some(txn) = transaction_id {
            record.transaction_id = txn.to_string();
        }
        record.updated_at = Utc::now();
        self.payments.update(&record)?;

        match status {
            PaymentStatus::Completed => {
                self.jobs.update_status(&record.job_id, JobStatus::Paid)?;
                info!(job_id = %record.job_id, "payment settled, job unlocked");
            }
            PaymentStatus::Failed => {
                warn!(job_id = %record.job_id, "payment failed");
            }
            PaymentStatus::Pending => {}
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteStore;
    use printflow_core::types::{PrintJob, PrintOptions};

    fn service(demo: bool) -> (PaymentService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open in-memory db"));
        let service = PaymentService::new(store.clone(), store.clone(), demo);
        (service, store)
    }

    fn seeded_job(store: &SqliteStore) -> PrintJob {
        let job = PrintJob::new(
            "user-1",
            "printer-1",
            PrintOptions {
                copies: 2,
                pages: 3,
                color: false,
                double_sided: true,
            },
        );
        PrintJobRepository::create(store, &job).expect("insert job");
        job
    }

    fn load_job(store: &SqliteStore, id: &JobId) -> PrintJob {
        PrintJobRepository::get_by_id(store, id)
            .expect("get job")
            .expect("job exists")
    }

    #[test]
    fn demo_payment_settles_and_marks_job_paid() {
        let (service, store) = service(true);
        let job = seeded_job(&store);

        let record = service.process_payment(job.id, job.cost).expect("payment");
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.method, "demo");
        assert!(record.transaction_id.starts_with("demo_"));

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Paid);
        assert!(service.is_paid(&job.id).unwrap());
    }

    #[test]
    fn payment_for_unknown_job_is_not_found() {
        let (service, _store) = service(true);
        let err = service.process_payment(JobId::new(), 1.0).unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));
    }

    #[test]
    fn non_demo_payment_without_gateway_is_rejected() {
        let (service, store) = service(false);
        let job = seeded_job(&store);
        let err = service.process_payment(job.id, job.cost).unwrap_err();
        assert!(matches!(err, PrintflowError::State(_)));

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[test]
    fn completed_callback_unlocks_job() {
        let (service, store) = service(true);
        let job = seeded_job(&store);

        let now = Utc::now();
        let record = PaymentRecord {
            id: "pay-cb".into(),
            job_id: job.id,
            amount: job.cost,
            status: PaymentStatus::Pending,
            method: "card".into(),
            transaction_id: String::new(),
            created_at: now,
            updated_at: now,
        };
        PaymentRepository::create(store.as_ref(), &record).expect("insert payment");

        let updated = service
            .process_callback("pay-cb", PaymentStatus::Completed, Some("txn-42"))
            .expect("callback");
        assert_eq!(updated.status, PaymentStatus::Completed);
        assert_eq!(updated.transaction_id, "txn-42");

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Paid);
    }

    #[test]
    fn failed_callback_leaves_job_pending() {
        let (service, store) = service(true);
        let job = seeded_job(&store);

        let now = Utc::now();
        let record = PaymentRecord {
            id: "pay-fail".into(),
            job_id: job.id,
            amount: job.cost,
            status: PaymentStatus::Pending,
            method: "card".into(),
            transaction_id: String::new(),
            created_at: now,
            updated_at: now,
        };
        PaymentRepository::create(store.as_ref(), &record).expect("insert payment");

        service
            .process_callback("pay-fail", PaymentStatus::Failed, None)
            .expect("callback");

        let loaded = load_job(&store, &job.id);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(!service.is_paid(&job.id).unwrap());
    }

    #[test]
    fn callback_for_unknown_payment_is_not_found() {
        let (service, _store) = service(true);
        let err = service
            .process_callback("nope", PaymentStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));
    }
}
