//! Resumable HTTP downloader.
//!
//! Streams a remote file to disk in fixed-size blocks, appending to whatever
//! a previous attempt left behind:
//! - The resume offset is re-read from the file size before every attempt
//! - Each block is flushed before progress is reported, so a crash loses at
//!   most the block in flight
//! - Transient network failures are retried with the configured backoff
//! - A `416 Range Not Satisfiable` discards the partial file and restarts
//!   from zero, once

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use super::session::DownloadSession;
use crate::error::{is_fatal_local, UpdateError, UpdateResult};
use crate::net::{
    HttpTransport, TransportError, STATUS_PARTIAL_CONTENT, STATUS_RANGE_NOT_SATISFIABLE,
};

/// Size of one streamed block (512 KiB).
pub const BLOCK_SIZE: usize = 512 * 1024;

/// Why a single attempt stopped.
#[derive(Debug)]
enum AttemptError {
    /// The server rejected the resume offset.
    RangeNotSatisfiable,
    /// Network or HTTP failure.
    Transport(TransportError),
    /// Writing to the destination failed.
    Write(io::Error),
}

/// Downloads files with resume and retry.
pub struct ResumableDownloader<T: HttpTransport> {
    transport: Arc<T>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    block_size: usize,
}

impl<T: HttpTransport> ResumableDownloader<T> {
    /// Create a downloader that sleeps for real between attempts.
    pub fn new(transport: Arc<T>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleeper: Arc::new(ThreadSleeper),
            block_size: BLOCK_SIZE,
        }
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Override the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Retry policy applied to failed attempts.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download `url` to `dest`, resuming any partial file.
    ///
    /// `on_progress` is called after every flushed block with
    /// `(bytes_this_session, block_len, remaining_total)`, where
    /// `remaining_total` is the size of the current response body, or 0 when
    /// the server did not announce it.
    ///
    /// Returns `Ok(false)` when the download could not be completed (network
    /// failures after all retries, rejected ranges, ordinary write errors).
    /// The partial file is kept either way.
    ///
    /// # Errors
    ///
    /// Returns an error for local failures that retrying cannot fix: no
    /// space left or permission denied.
    pub fn try_download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(u64, u64, u64),
    ) -> UpdateResult<bool> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| UpdateError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut restarted = false;
        let mut attempt = 1;

        loop {
            let mut session = DownloadSession::resume(dest);
            debug!(url, offset = session.offset(), attempt, "Starting download attempt");

            let reason = match self.transfer(url, &mut session, on_progress) {
                Ok(()) => {
                    info!(
                        url,
                        path = %dest.display(),
                        bytes = session.offset(),
                        throughput = session.throughput().unwrap_or(0.0),
                        "Download complete"
                    );
                    return Ok(true);
                }
                Err(AttemptError::RangeNotSatisfiable) if !restarted => {
                    warn!(
                        url,
                        offset = session.offset(),
                        "Server rejected resume offset, restarting from zero"
                    );
                    session.discard().map_err(|e| UpdateError::io(dest, e))?;
                    restarted = true;
                    continue;
                }
                Err(AttemptError::RangeNotSatisfiable) => {
                    error!(url, "Server rejected the range request again, giving up");
                    return Ok(false);
                }
                Err(AttemptError::Write(e)) if is_fatal_local(&e) => {
                    return Err(UpdateError::io(dest, e));
                }
                Err(AttemptError::Write(e)) => {
                    error!(url, path = %dest.display(), error = %e, "Failed to write download");
                    return Ok(false);
                }
                Err(AttemptError::Transport(e)) if !e.is_transient() => {
                    error!(url, error = %e, "Download failed");
                    return Ok(false);
                }
                Err(AttemptError::Transport(e)) => e,
            };

            match self.policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    warn!(
                        url,
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        error = %reason,
                        delay_secs = delay.as_secs_f64(),
                        "Download attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                None => {
                    error!(url, attempts = attempt, error = %reason, "Download failed, giving up");
                    return Ok(false);
                }
            }
        }
    }

    /// Download `url` to `dest`, reporting every failure as `false`.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(u64, u64, u64),
    ) -> bool {
        match self.try_download(url, dest, on_progress) {
            Ok(done) => done,
            Err(e) => {
                error!(url, error = %e, "Download aborted");
                false
            }
        }
    }

    /// One request/stream cycle.
    fn transfer(
        &self,
        url: &str,
        session: &mut DownloadSession,
        on_progress: &mut dyn FnMut(u64, u64, u64),
    ) -> Result<(), AttemptError> {
        let response = self
            .transport
            .get_range(url, session.offset())
            .map_err(AttemptError::Transport)?;

        let remaining = match response.status {
            STATUS_RANGE_NOT_SATISFIABLE => return Err(AttemptError::RangeNotSatisfiable),
            STATUS_PARTIAL_CONTENT => response.content_length,
            status if (200..300).contains(&status) => response.content_length,
            status => return Err(AttemptError::Transport(TransportError::Status(status))),
        };

        let file = session.open_append().map_err(AttemptError::Write)?;
        if response.status != STATUS_PARTIAL_CONTENT && session.offset() > 0 {
            info!(
                url,
                offset = session.offset(),
                "Server ignored range request, restarting from zero"
            );
            session.truncate(&file).map_err(AttemptError::Write)?;
        }

        let total = remaining.map_or(0, |r| session.offset() + r);
        session.set_total(total);
        let started = Instant::now();
        let received = stream_blocks(
            response.body,
            file,
            session,
            self.block_size,
            remaining.unwrap_or(0),
            on_progress,
        )?;

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            session.set_throughput(received as f64 / elapsed);
        }

        match remaining {
            Some(expected) if received < expected => Err(AttemptError::Transport(
                TransportError::Body(format!(
                    "connection closed after {} of {} bytes",
                    received, expected
                )),
            )),
            _ => Ok(()),
        }
    }
}

/// Copy `body` into `file` block by block. Returns bytes received.
fn stream_blocks(
    mut body: Box<dyn Read + Send>,
    mut file: File,
    session: &mut DownloadSession,
    block_size: usize,
    remaining: u64,
    on_progress: &mut dyn FnMut(u64, u64, u64),
) -> Result<u64, AttemptError> {
    let mut buffer = vec![0u8; block_size];
    let mut received = 0u64;

    loop {
        let (filled, read_error) = fill_block(&mut body, &mut buffer);

        if filled > 0 {
            file.write_all(&buffer[..filled])
                .and_then(|_| file.flush())
                .map_err(AttemptError::Write)?;
            session.advance(filled as u64);
            received += filled as u64;
            on_progress(received, filled as u64, remaining);
        }

        if let Some(e) = read_error {
            return Err(AttemptError::Transport(TransportError::Body(e.to_string())));
        }
        if filled < buffer.len() {
            return Ok(received);
        }
    }
}

/// Read until `buf` is full or the body ends.
///
/// A read error is returned alongside whatever was read before it, so those
/// bytes can still be written.
fn fill_block(body: &mut dyn Read, buf: &mut [u8]) -> (usize, Option<io::Error>) {
    let mut filled = 0;
    while filled < buf.len() {
        match body.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }
    (filled, None)
}
