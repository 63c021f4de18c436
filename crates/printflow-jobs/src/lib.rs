// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printflow Jobs — the print-job lifecycle: persistence capabilities,
// payment gating, document spooling, and the orchestrator that coordinates
// them with the device registry in `printflow-print`.

pub mod orchestrator;
pub mod payment;
pub mod repository;
pub mod spool;

pub use orchestrator::JobOrchestrator;
pub use payment::PaymentService;
pub use repository::{PaymentRepository, PrintJobRepository, SqliteStore};
pub use spool::DocumentSpool;
