// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem spool for document payloads.
//
// Jobs store only an opaque `file_ref` string; the bytes live here until the
// transfer completes. The ref format is private to this module.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::JobId;

/// Spool directory holding one file per submitted document.
pub struct DocumentSpool {
    root: PathBuf,
}

impl DocumentSpool {
    /// Create a spool rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.root.join(format!("{job_id}.spool"))
    }

    /// Write the document bytes for a job and return its file ref.
    #[instrument(skip(self, data), fields(job_id = %job_id, bytes = data.len()))]
    pub fn store(&self, job_id: &JobId, data: &[u8]) -> Result<String> {
        let path = self.path_for(job_id);
        std::fs::write(&path, data)?;
        debug!("document spooled");
        Ok(path.to_string_lossy().into_owned())
    }

    /// Read back the bytes behind a file ref.
    ///
    /// A missing file maps to `NotFound` rather than a raw I/O error: the
    /// ref came from a job record, so absence means the document is gone,
    /// not that the disk misbehaved.
    pub fn load(&self, file_ref: &str) -> Result<Vec<u8>> {
        match std::fs::read(Path::new(file_ref)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PrintflowError::NotFound(
                format!("spooled document {file_ref}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the spooled file for a ref. Missing files are fine — removal
    /// is idempotent.
    pub fn remove(&self, file_ref: &str) -> Result<()> {
        match std::fs::remove_file(Path::new(file_ref)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = DocumentSpool::new(dir.path().join("spool")).expect("spool");

        let job_id = JobId::new();
        let file_ref = spool.store(&job_id, b"%PDF-1.4 fake document").expect("store");

        let data = spool.load(&file_ref).expect("load");
        assert_eq!(data, b"%PDF-1.4 fake document");
    }

    #[test]
    fn load_missing_ref_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = DocumentSpool::new(dir.path()).expect("spool");

        let missing = dir.path().join("nope.spool");
        let err = spool.load(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, PrintflowError::NotFound(_)));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = DocumentSpool::new(dir.path()).expect("spool");

        let job_id = JobId::new();
        let file_ref = spool.store(&job_id, b"bytes").expect("store");

        spool.remove(&file_ref).expect("first remove");
        spool.remove(&file_ref).expect("second remove");
        assert!(matches!(
            spool.load(&file_ref).unwrap_err(),
            PrintflowError::NotFound(_)
        ));
    }
}
