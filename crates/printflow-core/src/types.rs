// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printflow print automation service.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PrintflowError;

/// Wire protocols a device can speak.
///
/// This is a closed set: the protocol factory matches exhaustively on it, so
/// adding a variant forces every dispatch site to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterProtocol {
    /// Direct byte-stream printing with PJL framing (JetDirect, port 9100).
    Raw,
    /// Internet Printing Protocol over HTTP (port 631).
    Ipp,
    /// Line Printer Daemon, RFC 1179 (port 515).
    Lpd,
}

impl PrinterProtocol {
    /// Conventional TCP port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Raw => 9100,
            Self::Ipp => 631,
            Self::Lpd => 515,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Ipp => "ipp",
            Self::Lpd => "lpd",
        }
    }
}

impl FromStr for PrinterProtocol {
    type Err = PrintflowError;

    /// Parse a protocol name as stored on a device descriptor.
    ///
    /// Unknown values fail with `UnsupportedProtocol` — there is no silent
    /// fallback to raw.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "ipp" => Ok(Self::Ipp),
            "lpd" => Ok(Self::Lpd),
            other => Err(PrintflowError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl std::fmt::Display for PrinterProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of a physical printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterStatus {
    Ready,
    Busy,
    PaperJam,
    OutOfPaper,
    TonerLow,
    Unknown,
}

impl PrinterStatus {
    /// Parse a PJL `INFO STATUS` response by case-insensitive substring
    /// matching.
    ///
    /// Device status text is free-form and varies by vendor, so anything we
    /// don't recognise maps to `Unknown` — never an error.
    pub fn parse(response: &str) -> Self {
        let lower = response.to_ascii_lowercase();
        if lower.contains("paper jam") {
            Self::PaperJam
        } else if lower.contains("out of paper") {
            Self::OutOfPaper
        } else if lower.contains("toner low") {
            Self::TonerLow
        } else if lower.contains("busy") {
            Self::Busy
        } else if lower.contains("ready") {
            Self::Ready
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::Busy => "BUSY",
            Self::PaperJam => "PAPER_JAM",
            Self::OutOfPaper => "OUT_OF_PAPER",
            Self::TonerLow => "TONER_LOW",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Identifies a printer independently of any live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Caller-assigned device id, unique within one registry.
    pub id: String,
    pub name: String,
    /// Host address (IP or hostname), without port.
    pub address: String,
    pub port: u16,
    pub protocol: PrinterProtocol,
    /// Free-form metadata (model, location, ...).
    pub properties: HashMap<String, String>,
}

impl DeviceDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        protocol: PrinterProtocol,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            protocol,
            properties: HashMap::new(),
        }
    }

    /// `host:port` string for socket dialing.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of an orchestrated print job.
///
/// `Paid` is the single post-payment state; there is no separate
/// "ready to print".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, waiting for payment.
    Pending,
    /// Payment confirmed, dispatch permitted.
    Paid,
    /// Transfer to the device is in flight.
    Processing,
    /// Document delivered to the device.
    Completed,
    /// Transfer failed — see the job's error field.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

/// Execution state of a registry-local queued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuedJobStatus {
    Pending,
    Completed,
    Failed,
}

/// In-memory execution record tracking one document transfer.
///
/// Lives only inside the registry's per-device queue and is distinct from
/// the persisted [`PrintJob`]. The queue is an approximation of device-side
/// state, not the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub device_id: String,
    pub status: QueuedJobStatus,
    pub created_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            status: QueuedJobStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// User-selected print options, used for cost calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrintOptions {
    pub copies: u32,
    pub pages: u32,
    pub color: bool,
    pub double_sided: bool,
}

/// Per-page rate for colour printing.
const COLOR_PAGE_RATE: f64 = 5.0;
/// Per-page rate for monochrome printing.
const MONO_PAGE_RATE: f64 = 2.0;
/// Discount factor applied to double-sided jobs.
const DUPLEX_FACTOR: f64 = 0.8;

impl PrintOptions {
    /// Deterministic job cost: `pages * copies * rate * duplex_factor`.
    pub fn cost(&self) -> f64 {
        let rate = if self.color {
            COLOR_PAGE_RATE
        } else {
            MONO_PAGE_RATE
        };
        let factor = if self.double_sided { DUPLEX_FACTOR } else { 1.0 };
        f64::from(self.pages) * f64::from(self.copies) * rate * factor
    }
}

/// A persisted, orchestrated print job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub user_id: String,
    pub device_id: String,
    pub status: JobStatus,
    pub copies: u32,
    pub pages: u32,
    pub color: bool,
    pub double_sided: bool,
    pub cost: f64,
    /// Opaque reference to the spooled document bytes.
    pub file_ref: Option<String>,
    /// Diagnostic message from the last failed transfer.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        options: PrintOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            status: JobStatus::Pending,
            copies: options.copies,
            pages: options.pages,
            color: options.color,
            double_sided: options.double_sided,
            cost: options.cost(),
            file_ref: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// State of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// A payment associated with one print job.
///
/// The payment gateway is authoritative; the orchestrator reads these
/// records but never recomputes payment validity itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub job_id: JobId,
    pub amount: f64,
    pub status: PaymentStatus,
    pub method: String,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parse_known_values() {
        assert_eq!("raw".parse::<PrinterProtocol>().unwrap(), PrinterProtocol::Raw);
        assert_eq!("IPP".parse::<PrinterProtocol>().unwrap(), PrinterProtocol::Ipp);
        assert_eq!("lpd".parse::<PrinterProtocol>().unwrap(), PrinterProtocol::Lpd);
    }

    #[test]
    fn protocol_parse_unknown_fails() {
        let err = "smb".parse::<PrinterProtocol>().unwrap_err();
        assert!(matches!(err, PrintflowError::UnsupportedProtocol(_)));
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(PrinterStatus::parse("@PJL INFO STATUS Paper Jam"), PrinterStatus::PaperJam);
        assert_eq!(PrinterStatus::parse("PAPER JAM tray 2"), PrinterStatus::PaperJam);
        assert_eq!(PrinterStatus::parse("printer READY"), PrinterStatus::Ready);
        assert_eq!(PrinterStatus::parse("Out Of Paper"), PrinterStatus::OutOfPaper);
        assert_eq!(PrinterStatus::parse("toner low, replace soon"), PrinterStatus::TonerLow);
        assert_eq!(PrinterStatus::parse("device busy"), PrinterStatus::Busy);
    }

    #[test]
    fn status_parse_unrecognised_maps_to_unknown() {
        assert_eq!(PrinterStatus::parse(""), PrinterStatus::Unknown);
        assert_eq!(PrinterStatus::parse("CODE=10001"), PrinterStatus::Unknown);
        assert_eq!(PrinterStatus::parse("\x00\x01garbage\u{fffd}"), PrinterStatus::Unknown);
    }

    #[test]
    fn cost_mono_duplex() {
        let options = PrintOptions {
            copies: 2,
            pages: 3,
            color: false,
            double_sided: true,
        };
        assert!((options.cost() - 9.6).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_color_single_page() {
        let options = PrintOptions {
            copies: 1,
            pages: 1,
            color: true,
            double_sided: false,
        };
        assert!((options.cost() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn new_job_starts_pending_with_computed_cost() {
        let options = PrintOptions {
            copies: 2,
            pages: 3,
            color: false,
            double_sided: true,
        };
        let job = PrintJob::new("user-1", "printer-1", options);
        assert_eq!(job.status, JobStatus::Pending);
        assert!((job.cost - 9.6).abs() < f64::EPSILON);
        assert!(job.file_ref.is_none());
    }
}
