//! Per-file download session state.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Progress of one destination file.
///
/// The resume offset always comes from the size of the file on disk, never
/// from remembered state, so a session can be rebuilt after a crash.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSession {
    path: PathBuf,
    offset: u64,
    total: u64,
    throughput: Option<f64>,
}

impl DownloadSession {
    /// Start or resume a session for `path`.
    pub fn resume(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            path,
            offset,
            total: 0,
            throughput: None,
        }
    }

    /// File the download is written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes already on disk.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Expected full size of the file, or 0 when unknown.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Average bytes per second of the last transfer, if one ran.
    pub fn throughput(&self) -> Option<f64> {
        self.throughput
    }

    /// Completion percentage, when the total size is known.
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.offset as f64 / self.total as f64 * 100.0).min(100.0))
    }

    pub(crate) fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        self.offset += bytes;
    }

    pub(crate) fn set_throughput(&mut self, bytes_per_sec: f64) {
        self.throughput = Some(bytes_per_sec);
    }

    /// Open the destination for appending, creating it if needed.
    pub(crate) fn open_append(&self) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Drop everything written so far.
    pub(crate) fn truncate(&mut self, file: &File) -> io::Result<()> {
        file.set_len(0)?;
        self.offset = 0;
        Ok(())
    }

    /// Remove the destination file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn discard(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.offset = 0;
        self.total = 0;
        Ok(())
    }
}
