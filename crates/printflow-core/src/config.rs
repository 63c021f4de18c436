// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use serde::{Deserialize, Serialize};

/// Persistent application settings.
///
/// Wire-level timeouts are deliberately not configurable; they live as
/// constants next to the protocol code that uses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where uploaded documents are spooled until printed.
    pub spool_dir: String,
    /// Process payments through the demo gateway instead of a real provider.
    pub demo_payments: bool,
    /// Default interval between status polls, in seconds.
    pub status_poll_secs: u64,
    /// TCP ports probed during subnet discovery.
    pub discovery_ports: Vec<u16>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            spool_dir: "spool".into(),
            demo_payments: true,
            status_poll_secs: 30,
            discovery_ports: vec![9100, 515, 631],
        }
    }
}
