// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Protocol client variants behind one capability surface.
//
// The variants form a closed set selected once at construction, so every
// dispatch site is exhaustive-checked by the compiler — no trait objects,
// no runtime downcasts.  Unknown protocol names never get this far: parsing
// a descriptor's protocol field already fails with `UnsupportedProtocol`.

use printflow_core::error::Result;
use printflow_core::types::{DeviceDescriptor, PrinterProtocol, PrinterStatus};

use crate::ipp_client::IppClient;
use crate::lpd_client::LpdClient;
use crate::raw_client::RawClient;

/// A wire-protocol client bound to one device address.
pub enum ProtocolClient {
    Raw(RawClient),
    Ipp(IppClient),
    Lpd(LpdClient),
}

impl ProtocolClient {
    /// Factory: select the variant from a descriptor's protocol field.
    pub fn for_descriptor(descriptor: &DeviceDescriptor) -> Result<Self> {
        Ok(match descriptor.protocol {
            PrinterProtocol::Raw => Self::Raw(RawClient::new(descriptor.socket_addr())),
            PrinterProtocol::Ipp => {
                Self::Ipp(IppClient::new(&descriptor.address, descriptor.port)?)
            }
            PrinterProtocol::Lpd => Self::Lpd(LpdClient::new(descriptor.socket_addr())),
        })
    }

    /// Open the connection (or, for IPP, verify the endpoint responds).
    pub async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Raw(c) => c.connect().await,
            Self::Ipp(c) => c.probe().await,
            Self::Lpd(c) => c.connect().await,
        }
    }

    /// Post-dial self-test.  Raw verifies the PJL ECHO round trip; for IPP
    /// and LPD the connect itself is the viability check.
    pub async fn self_test(&mut self) -> Result<()> {
        match self {
            Self::Raw(c) => c.echo_test().await,
            Self::Ipp(_) | Self::Lpd(_) => Ok(()),
        }
    }

    pub async fn query_status(&mut self) -> Result<PrinterStatus> {
        match self {
            Self::Raw(c) => c.query_status().await,
            Self::Ipp(c) => c.printer_status().await,
            Self::Lpd(c) => c.query_status().await,
        }
    }

    pub async fn print(&mut self, document: &[u8]) -> Result<()> {
        match self {
            Self::Raw(c) => c.print(document).await,
            Self::Ipp(c) => c.print_job(document.to_vec()).await,
            Self::Lpd(c) => c.print(document).await,
        }
    }

    /// Best-effort abort of the current job.
    pub async fn cancel(&mut self) -> Result<()> {
        match self {
            Self::Raw(c) => c.cancel().await,
            // IPP cancel needs the printer-assigned job id, which the
            // minimal Print-Job path does not track.
            Self::Ipp(_) => Ok(()),
            Self::Lpd(c) => c.cancel().await,
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Raw(c) => c.disconnect().await,
            Self::Ipp(_) => Ok(()),
            Self::Lpd(c) => c.disconnect().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_variant_by_protocol() {
        let raw = DeviceDescriptor::new("p1", "P1", "10.0.0.5", 9100, PrinterProtocol::Raw);
        assert!(matches!(
            ProtocolClient::for_descriptor(&raw).unwrap(),
            ProtocolClient::Raw(_)
        ));

        let ipp = DeviceDescriptor::new("p2", "P2", "10.0.0.6", 631, PrinterProtocol::Ipp);
        assert!(matches!(
            ProtocolClient::for_descriptor(&ipp).unwrap(),
            ProtocolClient::Ipp(_)
        ));

        let lpd = DeviceDescriptor::new("p3", "P3", "10.0.0.7", 515, PrinterProtocol::Lpd);
        assert!(matches!(
            ProtocolClient::for_descriptor(&lpd).unwrap(),
            ProtocolClient::Lpd(_)
        ));
    }
}
