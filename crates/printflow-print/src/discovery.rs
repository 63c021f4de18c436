// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subnet scanner for network printers.
//
// Probes every host of the local /24 on the well-known printer ports with a
// short-deadline dial plus a PJL enquiry.  Only hosts that answer with a
// recognisable token become descriptors; silence, timeouts, and garbled
// replies are all treated as "not a printer" rather than errors.  The scan
// is sequential — O(hosts × ports) probes, one at a time.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{DeviceDescriptor, PrinterProtocol};

use crate::pjl;

/// Well-known printer ports probed during discovery.
pub const PRINTER_PORTS: &[u16] = &[9100, 515, 631];

/// Dial deadline per probe.  Short, given the breadth of the scan.
const PROBE_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Read deadline for the enquiry response.
const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Scan the local /24 subnet on the given ports.
///
/// Fails with `Discovery` only if the local interface address cannot be
/// determined; unresponsive hosts are not errors.
pub async fn scan_local_subnet(ports: &[u16]) -> Result<Vec<DeviceDescriptor>> {
    let local = local_ipv4()?;
    info!(local = %local, "starting subnet printer scan");
    Ok(scan_subnet(local, ports).await)
}

/// Probe every host of `base`'s /24 on each port, in order.
pub async fn scan_subnet(base: Ipv4Addr, ports: &[u16]) -> Vec<DeviceDescriptor> {
    let octets = base.octets();
    let mut found = Vec::new();

    for &port in ports {
        for host in 1u8..255 {
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], host);
            if let Some(descriptor) = probe_host(SocketAddr::new(IpAddr::V4(ip), port)).await {
                info!(addr = %descriptor.socket_addr(), "printer discovered");
                found.push(descriptor);
            }
        }
    }

    debug!(count = found.len(), "subnet scan finished");
    found
}

/// Probe a single candidate: dial, send the PJL enquiry, and accept the
/// host only if the reply carries the `PJL`/`READY` token.
pub async fn probe_host(addr: SocketAddr) -> Option<DeviceDescriptor> {
    let mut stream = tokio::time::timeout(PROBE_DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .ok()?
        .ok()?;

    stream.write_all(&pjl::frame(pjl::ENQUIRE)).await.ok()?;

    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(PROBE_READ_TIMEOUT, stream.read(&mut buf))
        .await
        .ok()?
        .ok()?;
    if n == 0 {
        return None;
    }

    let response = String::from_utf8_lossy(&buf[..n]);
    if !pjl::is_probe_response(&response) {
        return None;
    }

    let mut descriptor = DeviceDescriptor::new(
        format!("printer-{}-{}", addr.ip(), addr.port()),
        format!("Printer at {}", addr.ip()),
        addr.ip().to_string(),
        addr.port(),
        PrinterProtocol::Raw,
    );
    descriptor
        .properties
        .insert("model".into(), "Auto-detected printer".into());
    descriptor.properties.insert("status".into(), "READY".into());
    Some(descriptor)
}

/// Determine the local IPv4 address by "connecting" a UDP socket to a
/// public address — no packet is sent, the OS just picks the route.
fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| PrintflowError::Discovery(format!("bind probe socket: {e}")))?;
    socket
        .connect("8.8.8.8:53")
        .map_err(|e| PrintflowError::Discovery(format!("route probe: {e}")))?;
    let addr = socket
        .local_addr()
        .map_err(|e| PrintflowError::Discovery(format!("local address: {e}")))?;

    match addr.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() => Ok(ip),
        other => Err(PrintflowError::Discovery(format!(
            "no usable local IPv4 address (got {other})"
        ))),
    }
}
