// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printflow Print — wire-protocol clients (raw/PJL, IPP, LPD), per-device
// sessions, the concurrent device registry, and subnet discovery.  This crate
// bridges between the core domain types defined in `printflow-core` and the
// actual network printing infrastructure.

pub mod discovery;
pub mod ipp_client;
pub mod lpd_client;
pub mod pjl;
pub mod protocol;
pub mod raw_client;
pub mod registry;
pub mod session;

pub use protocol::ProtocolClient;
pub use registry::{DeviceRegistry, TransferCancel, TransferHandle};
pub use session::DeviceSession;
