// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal async IPP client for the IPP protocol variant.
//
// Uses the `ipp` crate's async API.  Deliberately thin: a Get-Printer-
// Attributes round trip serves as the connect viability check, Print-Job
// submits documents, and `printer-state` is mapped onto the shared status
// enum.  Full attribute negotiation is out of scope.

use ipp::prelude::*;
use tracing::{debug, info};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::PrinterStatus;

/// Async IPP client bound to a single printer endpoint.
pub struct IppClient {
    uri: Uri,
}

impl IppClient {
    /// Build a client for the conventional `ipp://host:port/ipp/print`
    /// endpoint of a device.
    pub fn new(address: &str, port: u16) -> Result<Self> {
        let uri_str = format!("ipp://{address}:{port}/ipp/print");
        let uri: Uri = uri_str
            .parse()
            .map_err(|e| PrintflowError::Protocol(format!("invalid IPP URI '{uri_str}': {e}")))?;
        Ok(Self { uri })
    }

    /// Viability probe: a successful Get-Printer-Attributes round trip means
    /// the device is reachable and speaks IPP.
    pub async fn probe(&self) -> Result<()> {
        debug!(uri = %self.uri, "sending Get-Printer-Attributes probe");
        self.printer_attributes().await.map(|_| ())
    }

    /// Current device state, mapped from the IPP `printer-state` attribute
    /// (RFC 8011 §5.4.11): 3 = idle, 4 = processing.  Anything else, or an
    /// absent attribute, maps to `Unknown`.
    pub async fn printer_status(&self) -> Result<PrinterStatus> {
        let response = self.printer_attributes().await?;
        let state = printer_state(response.attributes());
        Ok(match state {
            Some(3) => PrinterStatus::Ready,
            Some(4) => PrinterStatus::Busy,
            _ => PrinterStatus::Unknown,
        })
    }

    /// Submit a document as a Print-Job operation.
    pub async fn print_job(&self, document: Vec<u8>) -> Result<()> {
        let payload = IppPayload::new(std::io::Cursor::new(document));
        let operation = IppOperationBuilder::print_job(self.uri.clone(), payload)
            .job_title("printflow job")
            .build();
        let client = AsyncIppClient::new(self.uri.clone());

        info!(uri = %self.uri, "sending Print-Job");
        let response = client
            .send(operation)
            .await
            .map_err(|e| PrintflowError::Connection(format!("Print-Job to {}: {e}", self.uri)))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            return Err(PrintflowError::Protocol(format!(
                "Print-Job to {} returned status {code:?}",
                self.uri
            )));
        }

        info!(uri = %self.uri, "print job accepted by printer");
        Ok(())
    }

    async fn printer_attributes(&self) -> Result<IppRequestResponse> {
        let operation = IppOperationBuilder::get_printer_attributes(self.uri.clone()).build();
        let client = AsyncIppClient::new(self.uri.clone());

        let response = client.send(operation).await.map_err(|e| {
            PrintflowError::Connection(format!("Get-Printer-Attributes to {}: {e}", self.uri))
        })?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            return Err(PrintflowError::Protocol(format!(
                "Get-Printer-Attributes to {} returned status {code:?}",
                self.uri
            )));
        }

        Ok(response)
    }
}

/// Extract the integer `printer-state` value from a response.
fn printer_state(attrs: &IppAttributes) -> Option<i32> {
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        if let Some(attr) = group.attributes().get("printer-state") {
            match attr.value() {
                IppValue::Enum(v) | IppValue::Integer(v) => return Some(*v),
                _ => return None,
            }
        }
    }
    None
}
