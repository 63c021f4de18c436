// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistence capabilities for jobs and payments.
//
// The orchestrator talks to storage exclusively through these traits; no
// SQL or storage-format decisions leak into it.  The bundled implementation
// is a SQLite store.  `rusqlite` is synchronous, so async callers should
// wrap calls in `tokio::task::spawn_blocking` if they block for long —
// these queries are all single-row and short.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{JobId, JobStatus, PaymentRecord, PaymentStatus, PrintJob};

/// Narrow persistence capability for print jobs.
pub trait PrintJobRepository: Send + Sync {
    fn create(&self, job: &PrintJob) -> Result<()>;
    fn get_by_id(&self, id: &JobId) -> Result<Option<PrintJob>>;
    fn get_by_user(&self, user_id: &str) -> Result<Vec<PrintJob>>;
    fn update(&self, job: &PrintJob) -> Result<()>;
    fn update_status(&self, id: &JobId, status: JobStatus) -> Result<()>;
    fn exists(&self, id: &JobId) -> Result<bool>;
}

/// Narrow persistence capability for payment records.
pub trait PaymentRepository: Send + Sync {
    fn create(&self, payment: &PaymentRecord) -> Result<()>;
    fn get_by_id(&self, id: &str) -> Result<Option<PaymentRecord>>;
    fn get_by_job_id(&self, job_id: &JobId) -> Result<Option<PaymentRecord>>;
    fn update(&self, payment: &PaymentRecord) -> Result<()>;
}

/// SQLite schema for the jobs and payments tables.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        status TEXT NOT NULL,
        copies INTEGER NOT NULL,
        pages INTEGER NOT NULL,
        color INTEGER NOT NULL,
        double_sided INTEGER NOT NULL,
        cost REAL NOT NULL,
        file_ref TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        amount REAL NOT NULL,
        status TEXT NOT NULL,
        method TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs (user_id);
    CREATE INDEX IF NOT EXISTS idx_payments_job ON payments (job_id);
"#;

const JOB_COLUMNS: &str = "id, user_id, device_id, status, copies, pages, color,
        double_sided, cost, file_ref, error_message, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, job_id, amount, status, method, transaction_id,
        created_at, updated_at";

/// SQLite-backed store implementing both repository capabilities.
///
/// The connection sits behind a mutex so one store can be shared across
/// tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    ///
    /// Applies WAL journal mode for better concurrent-read behaviour and
    /// creates the tables if they do not exist.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PrintflowError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PrintflowError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| PrintflowError::Database(format!("create tables: {e}")))?;

        info!("job store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PrintflowError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| PrintflowError::Database(format!("create tables: {e}")))?;

        debug!("in-memory job store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection lock poisoned")
    }
}

impl PrintJobRepository for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn create(&self, job: &PrintJob) -> Result<()> {
        let status_json = serde_json::to_string(&job.status)?;
        self.lock()
            .execute(
                "INSERT INTO jobs (id, user_id, device_id, status, copies, pages, color,
                 double_sided, cost, file_ref, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.user_id,
                    job.device_id,
                    status_json,
                    job.copies,
                    job.pages,
                    job.color,
                    job.double_sided,
                    job.cost,
                    job.file_ref,
                    job.error_message,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PrintflowError::Database(format!("insert job: {e}")))?;

        info!("job persisted");
        Ok(())
    }

    fn get_by_id(&self, id: &JobId) -> Result<Option<PrintJob>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .map_err(|e| PrintflowError::Database(format!("prepare get job: {e}")))?;

        let mut rows = stmt
            .query_map(params![id.to_string()], row_to_print_job)
            .map_err(|e| PrintflowError::Database(format!("query get job: {e}")))?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(PrintflowError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    fn get_by_user(&self, user_id: &str) -> Result<Vec<PrintJob>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ?1 ORDER BY created_at DESC"
            ))
            .map_err(|e| PrintflowError::Database(format!("prepare user jobs: {e}")))?;

        let jobs = stmt
            .query_map(params![user_id], row_to_print_job)
            .map_err(|e| PrintflowError::Database(format!("query user jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PrintflowError::Database(format!("collect rows: {e}")))?;

        Ok(jobs)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn update(&self, job: &PrintJob) -> Result<()> {
        let status_json = serde_json::to_string(&job.status)?;
        let rows = self
            .lock()
            .execute(
                "UPDATE jobs SET status = ?1, file_ref = ?2, error_message = ?3,
                 updated_at = ?4 WHERE id = ?5",
                params![
                    status_json,
                    job.file_ref,
                    job.error_message,
                    job.updated_at.to_rfc3339(),
                    job.id.to_string(),
                ],
            )
            .map_err(|e| PrintflowError::Database(format!("update job: {e}")))?;

        if rows == 0 {
            return Err(PrintflowError::NotFound(format!("job {}", job.id)));
        }
        debug!(status = ?job.status, "job updated");
        Ok(())
    }

    #[instrument(skip(self))]
    fn update_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let status_json = serde_json::to_string(&status)?;
        let rows = self
            .lock()
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status_json, Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(|e| PrintflowError::Database(format!("update status: {e}")))?;

        if rows == 0 {
            return Err(PrintflowError::NotFound(format!("job {id}")));
        }
        debug!(job_id = %id, status = ?status, "job status updated");
        Ok(())
    }

    fn exists(&self, id: &JobId) -> Result<bool> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| PrintflowError::Database(format!("exists: {e}")))?;
        Ok(count > 0)
    }
}

impl PaymentRepository for SqliteStore {
    #[instrument(skip(self, payment), fields(payment_id = %payment.id, job_id = %payment.job_id))]
    fn create(&self, payment: &PaymentRecord) -> Result<()> {
        let status_json = serde_json::to_string(&payment.status)?;
        self.lock()
            .execute(
                "INSERT INTO payments (id, job_id, amount, status, method, transaction_id,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    payment.id,
                    payment.job_id.to_string(),
                    payment.amount,
                    status_json,
                    payment.method,
                    payment.transaction_id,
                    payment.created_at.to_rfc3339(),
                    payment.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PrintflowError::Database(format!("insert payment: {e}")))?;

        info!("payment persisted");
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<PaymentRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"))
            .map_err(|e| PrintflowError::Database(format!("prepare get payment: {e}")))?;

        let mut rows = stmt
            .query_map(params![id], row_to_payment)
            .map_err(|e| PrintflowError::Database(format!("query get payment: {e}")))?;

        match rows.next() {
            Some(Ok(payment)) => Ok(Some(payment)),
            Some(Err(e)) => Err(PrintflowError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    fn get_by_job_id(&self, job_id: &JobId) -> Result<Option<PaymentRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE job_id = ?1
                 ORDER BY created_at DESC"
            ))
            .map_err(|e| PrintflowError::Database(format!("prepare job payment: {e}")))?;

        let mut rows = stmt
            .query_map(params![job_id.to_string()], row_to_payment)
            .map_err(|e| PrintflowError::Database(format!("query job payment: {e}")))?;

        match rows.next() {
            Some(Ok(payment)) => Ok(Some(payment)),
            Some(Err(e)) => Err(PrintflowError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    fn update(&self, payment: &PaymentRecord) -> Result<()> {
        let status_json = serde_json::to_string(&payment.status)?;
        let rows = self
            .lock()
            .execute(
                "UPDATE payments SET status = ?1, transaction_id = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    status_json,
                    payment.transaction_id,
                    payment.updated_at.to_rfc3339(),
                    payment.id,
                ],
            )
            .map_err(|e| PrintflowError::Database(format!("update payment: {e}")))?;

        if rows == 0 {
            return Err(PrintflowError::NotFound(format!("payment {}", payment.id)));
        }
        debug!(status = ?payment.status, "payment updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_timestamp(col: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(col: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a SQLite row to a `PrintJob`.  Column indices must match
/// [`JOB_COLUMNS`].
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id_str: String = row.get(0)?;
    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_json: String = row.get(3)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    Ok(PrintJob {
        id: JobId(uuid),
        user_id: row.get(1)?,
        device_id: row.get(2)?,
        status: parse_json(3, &status_json)?,
        copies: row.get(4)?,
        pages: row.get(5)?,
        color: row.get(6)?,
        double_sided: row.get(7)?,
        cost: row.get(8)?,
        file_ref: row.get(9)?,
        error_message: row.get(10)?,
        created_at: parse_timestamp(11, &created_at_str)?,
        updated_at: parse_timestamp(12, &updated_at_str)?,
    })
}

/// Map a SQLite row to a `PaymentRecord`.  Column indices must match
/// [`PAYMENT_COLUMNS`].
fn row_to_payment(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRecord> {
    let job_id_str: String = row.get(1)?;
    let job_uuid = uuid::Uuid::parse_str(&job_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_json: String = row.get(3)?;
    let created_at_str: String = row.get(6)?;
    let updated_at_str: String = row.get(7)?;

    Ok(PaymentRecord {
        id: row.get(0)?,
        job_id: JobId(job_uuid),
        amount: row.get(2)?,
        status: parse_json(3, &status_json)?,
        method: row.get(4)?,
        transaction_id: row.get(5)?,
        created_at: parse_timestamp(6, &created_at_str)?,
        updated_at: parse_timestamp(7, &updated_at_str)?,
    })
}
