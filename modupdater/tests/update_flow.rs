//! Integration tests for the update flow.
//!
//! These tests drive the public API against an in-memory HTTP server:
//! - Download interruption and resume
//! - Repeated manifest checks
//! - Digest verification of tampered files
//! - Extraction that fails half way
//! - Full system update runs, successful and rejected
//!
//! Run with: `cargo test --test update_flow`

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use modupdater::download::RecordingSleeper;
use modupdater::extractor::STAGING_DIR_NAME;
use modupdater::progress::RecordingProgress;
use modupdater::{
    ArchiveExtractor, ChecksumVerifier, DigestAlgorithm, HttpTransport, ManualReboot,
    RangeResponse, ResumableDownloader, RetryPolicy, StagedExtractor, Track, TransportError,
    UpdateOrchestrator, UpdateOutcome, UpdateState, UpdaterConfig, UserSignals,
};

const MIRROR: &str = "https://updates.test/source";

// ============================================================================
// In-memory server
// ============================================================================

/// Serves byte bodies with Range support. A URL can be set to cut the
/// connection after a number of bytes, once.
#[derive(Default)]
struct MemoryServer {
    files: Mutex<HashMap<String, Vec<u8>>>,
    cuts: Mutex<HashMap<String, u64>>,
    log: Mutex<Vec<(String, u64)>>,
}

impl MemoryServer {
    fn put(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().insert(url.to_string(), body.into());
    }

    fn cut_once(&self, url: &str, after: u64) {
        self.cuts.lock().insert(url.to_string(), after);
    }

    fn range_requests(&self, url: &str) -> Vec<u64> {
        self.log
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

struct CutReader {
    inner: Cursor<Vec<u8>>,
    left: u64,
}

impl Read for CutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "cut"));
        }
        let max = buf.len().min(self.left as usize);
        let n = self.inner.read(&mut buf[..max])?;
        self.left -= n as u64;
        Ok(n)
    }
}

impl HttpTransport for MemoryServer {
    fn head(&self, url: &str, _timeout: Duration) -> Result<u16, TransportError> {
        Ok(if self.files.lock().contains_key(url) { 200 } else { 404 })
    }

    fn get_text(&self, url: &str, _timeout: Duration) -> Result<String, TransportError> {
        let files = self.files.lock();
        let body = files.get(url).ok_or(TransportError::Status(404))?;
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    fn get_range(&self, url: &str, offset: u64) -> Result<RangeResponse, TransportError> {
        self.log.lock().push((url.to_string(), offset));
        let body = self
            .files
            .lock()
            .get(url)
            .cloned()
            .ok_or(TransportError::Status(404))?;

        if offset > 0 && offset >= body.len() as u64 {
            return Ok(RangeResponse {
                status: 416,
                content_length: Some(0),
                body: Box::new(io::empty()),
            });
        }

        let slice = body[offset as usize..].to_vec();
        let len = slice.len() as u64;
        let reader: Box<dyn Read + Send> = match self.cuts.lock().remove(url) {
            Some(after) => Box::new(CutReader {
                inner: Cursor::new(slice),
                left: after,
            }),
            None => Box::new(Cursor::new(slice)),
        };

        Ok(RangeResponse {
            status: if offset > 0 { 206 } else { 200 },
            content_length: Some(len),
            body: reader,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn publish_system(server: &MemoryServer, version: &str, archive: &[u8], digest: &str) {
    server.put(
        &format!("{}/update.txt", MIRROR),
        format!(
            "update_ver={v}\nupdate_url={m}/update.dep\nmd5_url={m}/update.dep.MD5\n",
            v = version,
            m = MIRROR
        ),
    );
    server.put(&format!("{}/update.dep", MIRROR), archive.to_vec());
    server.put(&format!("{}/update.dep.MD5", MIRROR), format!("{}  update.dep\n", digest));
}

fn device(root: &Path, system_version: &str) -> UpdaterConfig {
    let config = UpdaterConfig::rooted_at(root)
        .with_default_mirror(MIRROR)
        .with_app_version("1.0.0");
    fs::write(&config.paths.version_file, format!("{}\n", system_version)).unwrap();
    config
}

fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(dir: &Path, base: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, base, out);
            } else {
                let name = path.strip_prefix(base).unwrap().to_string_lossy().into_owned();
                out.push((name, fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn test_interrupted_download_resumes_to_identical_file() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("work").join("system.archive");
    let url = format!("{}/update.dep", MIRROR);
    let original = payload(3 * 1024 * 1024 + 123);

    let server = Arc::new(MemoryServer::default());
    server.put(&url, original.clone());
    server.cut_once(&url, 1_000_000);

    // No retries: the first call stops at the cut
    let sleeper = Arc::new(RecordingSleeper::new());
    let single = ResumableDownloader::new(Arc::clone(&server), RetryPolicy::None)
        .with_sleeper(sleeper.clone());
    assert!(!single.download(&url, &dest, &mut |_, _, _| {}));
    assert_eq!(fs::metadata(&dest).unwrap().len(), 1_000_000);

    let mut session_bytes = 0;
    assert!(single.download(&url, &dest, &mut |done, _, _| session_bytes = done));
    assert_eq!(fs::read(&dest).unwrap(), original);
    assert_eq!(session_bytes, original.len() as u64 - 1_000_000);
    assert_eq!(server.range_requests(&url), vec![0, 1_000_000]);
}

#[test]
fn test_retry_resumes_within_one_call() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("system.archive");
    let url = format!("{}/update.dep", MIRROR);
    let original = payload(700_000);

    let server = Arc::new(MemoryServer::default());
    server.put(&url, original.clone());
    server.cut_once(&url, 300_000);

    let sleeper = Arc::new(RecordingSleeper::new());
    let downloader = ResumableDownloader::new(
        Arc::clone(&server),
        RetryPolicy::linear(3, Duration::from_secs(2)),
    )
    .with_sleeper(sleeper.clone());

    assert!(downloader.download(&url, &dest, &mut |_, _, _| {}));
    assert_eq!(fs::read(&dest).unwrap(), original);
    assert_eq!(server.range_requests(&url), vec![0, 300_000]);
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(2)]);
}

// ============================================================================
// Manifest checks
// ============================================================================

#[test]
fn test_recheck_gives_same_decision() {
    let temp = TempDir::new().unwrap();
    let config = device(temp.path(), "1.0.6");
    let server = Arc::new(MemoryServer::default());
    let archive = zip_archive(&[("etc/os-release", b"1.2.0")]);
    publish_system(&server, "1.2.0", &archive, &md5_hex(&archive));

    let orchestrator = UpdateOrchestrator::new(config, server, Arc::new(UserSignals::new()));
    let first = orchestrator.check();
    let second = orchestrator.check();

    assert_eq!(first.decision, second.decision);
    assert_eq!(first.manifest, second.manifest);
    let offer = first.decision.deferred.unwrap();
    assert_eq!(offer.track, Track::System);
    assert_eq!(offer.current, "1.0.6");
    assert_eq!(offer.available, "1.2.0");
}

#[test]
fn test_unreachable_manifest_means_no_update() {
    let temp = TempDir::new().unwrap();
    let config = device(temp.path(), "1.0.6");
    let server = Arc::new(MemoryServer::default());

    let orchestrator = UpdateOrchestrator::new(config, server, Arc::new(UserSignals::new()));
    let report = orchestrator.check();
    assert!(report.manifest.is_empty());
    assert!(report.decision.is_empty());
}

// ============================================================================
// Verification
// ============================================================================

#[test]
fn test_flipped_byte_fails_verification() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("update.dep");
    let data = payload(50_000);
    fs::write(&file, &data).unwrap();

    for algorithm in [DigestAlgorithm::Md5, DigestAlgorithm::Sha256] {
        let verifier = ChecksumVerifier::new(algorithm);
        let source = temp.path().join(format!("update.dep.{}", algorithm));
        fs::write(&source, verifier.digest(&file)).unwrap();
        assert!(verifier.verify(&file, &source));

        let mut tampered = data.clone();
        tampered[25_000] ^= 0x01;
        let tampered_file = temp.path().join("tampered.dep");
        fs::write(&tampered_file, &tampered).unwrap();
        assert!(!verifier.verify(&tampered_file, &source));
    }
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn test_failed_extraction_leaves_target_unchanged() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("root");
    fs::create_dir_all(target.join("etc")).unwrap();
    fs::write(target.join("etc/os-release"), b"1.0.6").unwrap();
    let before = tree(&target);

    // A tar.gz cut short after its first entries
    let archive = temp.path().join("update.dep");
    {
        let encoder = flate2::write::GzEncoder::new(
            fs::File::create(&archive).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (name, size) in [("etc/os-release", 5usize), ("usr/big.bin", 400_000)] {
            let data = payload(size);
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
    let bytes = fs::read(&archive).unwrap();
    fs::write(&archive, &bytes[..bytes.len() * 2 / 3]).unwrap();

    let ok = StagedExtractor::new().extract(&archive, &target, &mut |_, _, _| {});

    assert!(!ok);
    assert_eq!(tree(&target), before);
    assert!(!target.join(STAGING_DIR_NAME).exists());
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn test_system_update_stages_payload_and_arms_boot_trigger() {
    let temp = TempDir::new().unwrap();
    let config = device(temp.path(), "1.0.6");
    let server = Arc::new(MemoryServer::default());
    let archive = zip_archive(&[
        ("etc/os-release", b"1.2.0"),
        ("usr/lib/libmod.so", &payload(200_000)),
    ]);
    publish_system(&server, "1.2.0", &archive, &md5_hex(&archive));

    let signals = Arc::new(UserSignals::new());
    signals.request_confirm();
    let sink = RecordingProgress::new();
    let mut orchestrator = UpdateOrchestrator::new(config.clone(), server, signals)
        .with_reboot(Box::new(ManualReboot))
        .with_sleeper(Arc::new(RecordingSleeper::new()));

    let report = orchestrator.run(&sink).unwrap();

    assert_eq!(report.outcome(), UpdateOutcome::AppliedPendingReboot);
    assert_eq!(orchestrator.state(Track::System), UpdateState::Applied);
    assert_eq!(
        fs::read(config.paths.pending_dir.join("etc/os-release")).unwrap(),
        b"1.2.0"
    );
    let script = fs::read_to_string(&config.paths.boot_script).unwrap();
    assert!(script.contains(&*config.paths.pending_dir.to_string_lossy()));
    assert!(script.contains(&*config.paths.system_root.to_string_lossy()));

    // Download progress was reported with percentages
    assert!(sink
        .updates()
        .iter()
        .any(|u| u.state == UpdateState::Downloading && u.percent == Some(100.0)));
}

#[test]
fn test_system_update_with_bad_digest_fails() {
    let temp = TempDir::new().unwrap();
    let config = device(temp.path(), "1.0.6");
    let server = Arc::new(MemoryServer::default());
    let archive = zip_archive(&[("etc/os-release", b"1.2.0")]);
    publish_system(&server, "1.2.0", &archive, "00000000000000000000000000000000");

    let signals = Arc::new(UserSignals::new());
    signals.request_confirm();
    let mut orchestrator = UpdateOrchestrator::new(config.clone(), server, signals)
        .with_reboot(Box::new(ManualReboot))
        .with_sleeper(Arc::new(RecordingSleeper::new()));

    let report = orchestrator.run(&RecordingProgress::new()).unwrap();

    assert_eq!(report.outcome(), UpdateOutcome::failed("checksum mismatch"));
    assert_eq!(orchestrator.state(Track::System), UpdateState::Failed);
    assert!(!config.paths.boot_script.exists());
    assert!(!config.paths.pending_dir.exists());
}
