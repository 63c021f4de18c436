// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printflow.

use thiserror::Error;

/// Top-level error type for all Printflow operations.
///
/// Messages carry enough context (device id, job id) for the calling layer
/// to render a user-facing message without re-querying.
#[derive(Debug, Error)]
pub enum PrintflowError {
    // -- Device connectivity --
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device protocol not supported: {0}")]
    UnsupportedProtocol(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Job lifecycle --
    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {0}")]
    State(String),

    #[error("payment required: {0}")]
    PaymentRequired(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintflowError>;
