//! Resumable archive downloads.
//!
//! - Single file downloads with resume support (`http`)
//! - Per-file resume state derived from the file on disk (`session`)
//! - Retry policy and injectable sleeping (`retry`)

mod http;
mod retry;
mod session;

pub use http::{ResumableDownloader, BLOCK_SIZE};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use session::DownloadSession;
