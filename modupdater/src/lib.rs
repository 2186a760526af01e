//! ModUpdater - over-the-air updates for handheld system mods
//!
//! This library checks a remote manifest for new versions of the updater
//! application, the base system image and the data overlay, then downloads,
//! verifies and stages them. System and data overlay payloads are applied by
//! a boot-time script; the application is updated in place.
//!
//! # Modules
//!
//! - [`manifest`]: mirror selection and manifest retrieval
//! - [`download`]: resumable downloads with retry
//! - [`checksum`]: digest verification against companion files
//! - [`extractor`]: staged archive extraction
//! - [`orchestrator`]: the per-track state machine driving an update
//! - [`boot`]: boot-time trigger and reboot hand-off
//! - [`config`], [`logging`]: ambient setup

pub mod boot;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod manifest;
pub mod net;
pub mod orchestrator;
pub mod progress;
pub mod track;
pub mod version;

pub use boot::{BootTrigger, ManualReboot, RebootHandoff, SystemReboot};
pub use checksum::{ChecksumVerifier, DigestAlgorithm, VerificationRecord};
pub use config::{ConfigError, ConfigKey, UpdaterConfig};
pub use download::{DownloadSession, ResumableDownloader, RetryPolicy, Sleeper};
pub use error::{UpdateError, UpdateResult};
pub use extractor::{ArchiveExtractor, StagedExtractor};
pub use manifest::{ManifestClient, MirrorSelector, UpdateManifest};
pub use net::{HttpTransport, RangeResponse, ReqwestTransport, TransportError};
pub use orchestrator::{
    CheckReport, RunReport, UpdateEvent, UpdateOrchestrator, UpdateOutcome, UpdateState,
    UserSignals,
};
pub use progress::{NullProgress, ProgressSink, ProgressUpdate, ThroughputMeter};
pub use track::Track;
pub use version::Version;
