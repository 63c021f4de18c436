// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PJL (Printer Job Language) command framing.
//
// PJL is a line-oriented text protocol layered on the raw byte stream of
// port-9100 printing.  Every command is preceded by the Universal Exit
// Language escape so it is recognised regardless of what state the printer's
// interpreter is in, and terminated CRLF.

/// Universal Exit Language preamble — resets the printer's interpreter to
/// the PJL command level.
pub const UEL: &[u8] = b"\x1B%-12345X";

/// Discovery probe command.
pub const ENQUIRE: &str = "ENQUIRE";
/// Connection self-test; the reply must echo the token back.
pub const ECHO: &str = "ECHO";
/// Status query.
pub const INFO_STATUS: &str = "INFO STATUS";
/// Abort the current job.
pub const CANCEL: &str = "CANCEL";
/// Switch the interpreter to PCL before streaming document bytes.
pub const ENTER_PCL: &str = "ENTER LANGUAGE=PCL";
/// End-of-job marker sent after the document bytes.
pub const EOJ: &str = "EOJ";

/// Frame a PJL command: `ESC %-12345X @PJL <COMMAND> CRLF`.
pub fn frame(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(UEL.len() + command.len() + 7);
    bytes.extend_from_slice(UEL);
    bytes.extend_from_slice(b"@PJL ");
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Whether a discovery-probe response identifies a printer.
///
/// A host counts as a printer only if its reply carries a recognisable
/// token; partial or garbled responses are rejected so discovery never
/// reports a false positive.
pub fn is_probe_response(response: &str) -> bool {
    let upper = response.to_ascii_uppercase();
    upper.contains("PJL") || upper.contains("READY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_produces_exact_wire_bytes() {
        assert_eq!(frame(ECHO), b"\x1B%-12345X@PJL ECHO\r\n");
        assert_eq!(frame(INFO_STATUS), b"\x1B%-12345X@PJL INFO STATUS\r\n");
        assert_eq!(frame(CANCEL), b"\x1B%-12345X@PJL CANCEL\r\n");
        assert_eq!(
            frame(ENTER_PCL),
            b"\x1B%-12345X@PJL ENTER LANGUAGE=PCL\r\n"
        );
    }

    #[test]
    fn probe_response_tokens_matched_case_insensitively() {
        assert!(is_probe_response("@PJL INFO STATUS"));
        assert!(is_probe_response("printer ready"));
        assert!(is_probe_response("READY"));
        assert!(is_probe_response("pjl"));
    }

    #[test]
    fn probe_response_rejects_garbled_data() {
        assert!(!is_probe_response(""));
        assert!(!is_probe_response("HTTP/1.1 400 Bad Request"));
        assert!(!is_probe_response("\u{1}\u{2}\u{3}"));
        assert!(!is_probe_response("SSH-2.0-OpenSSH_9.6"));
    }
}
