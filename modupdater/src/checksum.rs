//! Streaming digest verification.
//!
//! Archives are verified against a companion file published next to them.
//! The companion's first line holds the hex digest, optionally followed by
//! anything (a file name, as `md5sum` writes it); only the first token counts.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::track::Track;

/// Read buffer size for hashing (4 KiB).
const CHUNK_SIZE: usize = 4 * 1024;

/// Longest companion line read when looking for the digest.
pub const MAX_DIGEST_LINE: u64 = 4 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Lowercase name, as used in the config file.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(ConfigError::InvalidValue {
                key: "update.digest".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Outcome of one verification, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub track: Track,
    pub algorithm: DigestAlgorithm,
    /// Digest of the local file; empty when it could not be computed.
    pub computed: String,
    /// Digest from the companion file; empty when unavailable.
    pub expected: String,
}

impl VerificationRecord {
    /// Both digests are present and equal.
    pub fn is_match(&self) -> bool {
        digests_match(&self.computed, &self.expected)
    }
}

/// The match rule shared by every verification: both digests are present
/// and equal ignoring ASCII case.
pub fn digests_match(computed: &str, expected: &str) -> bool {
    !computed.is_empty() && !expected.is_empty() && computed.eq_ignore_ascii_case(expected)
}

/// Computes and compares file digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumVerifier {
    algorithm: DigestAlgorithm,
}

impl ChecksumVerifier {
    /// Verifier computing `algorithm` digests.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm used for every digest.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest of a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn try_digest(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Hasher::new(self.algorithm);
        let mut buffer = [0u8; CHUNK_SIZE];

        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finish())
    }

    /// Lowercase hex digest of a file, or an empty string if it cannot be
    /// read.
    pub fn digest(&self, path: &Path) -> String {
        self.try_digest(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Failed to compute digest");
            String::new()
        })
    }

    /// Expected digest from a companion file, or an empty string.
    ///
    /// Only the first line is read, up to [`MAX_DIGEST_LINE`] bytes. Bytes
    /// after the digest token need not be UTF-8.
    pub fn expected_digest(source: &Path) -> String {
        match read_first_line(source) {
            Ok(line) => parse_expected(&line),
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Failed to read digest file");
                String::new()
            }
        }
    }

    /// Compare a file against its companion digest file.
    pub fn verify_record(&self, track: Track, path: &Path, source: &Path) -> VerificationRecord {
        let record = VerificationRecord {
            track,
            algorithm: self.algorithm,
            computed: self.digest(path),
            expected: Self::expected_digest(source),
        };
        debug!(
            track = %track,
            algorithm = %record.algorithm,
            computed = %record.computed,
            expected = %record.expected,
            "Digest comparison"
        );
        record
    }

    /// Whether `path` matches the digest in `source`.
    ///
    /// An empty computed or expected digest never matches.
    pub fn verify(&self, path: &Path, source: &Path) -> bool {
        let computed = self.digest(path);
        let expected = Self::expected_digest(source);
        digests_match(&computed, &expected)
    }
}

fn read_first_line(source: &Path) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(source)?).take(MAX_DIGEST_LINE);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    Ok(line)
}

/// First whitespace-separated token, lowercased.
fn parse_expected(line: &[u8]) -> String {
    line.split(|b| b.is_ascii_whitespace())
        .find(|token| !token.is_empty())
        .map(|token| String::from_utf8_lossy(token).to_ascii_lowercase())
        .unwrap_or_default()
}
