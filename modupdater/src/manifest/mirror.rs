//! Mirror selection by probe latency.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::net::HttpTransport;

/// Result of probing one mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorProbe {
    pub base_url: String,
    /// Round-trip time, or `None` if the mirror did not answer usefully.
    pub latency: Option<Duration>,
}

/// Join a mirror base URL and a document name.
pub fn join_url(base: &str, name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Picks the fastest reachable mirror.
#[derive(Debug, Clone)]
pub struct MirrorSelector {
    probe_timeout: Duration,
}

impl MirrorSelector {
    /// Selector giving each probe `probe_timeout`.
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// HEAD `document` on every mirror and time the answers.
    ///
    /// Any 2xx or 3xx status counts as reachable.
    pub fn probe<T: HttpTransport + ?Sized>(
        &self,
        transport: &T,
        mirrors: &[String],
        document: &str,
    ) -> Vec<MirrorProbe> {
        mirrors
            .iter()
            .map(|base| {
                let url = join_url(base, document);
                let started = Instant::now();
                let latency = match transport.head(&url, self.probe_timeout) {
                    Ok(status) if (200..400).contains(&status) => Some(started.elapsed()),
                    Ok(status) => {
                        debug!(mirror = %base, status, "Mirror probe rejected");
                        None
                    }
                    Err(e) => {
                        debug!(mirror = %base, error = %e, "Mirror probe failed");
                        None
                    }
                };
                MirrorProbe {
                    base_url: base.clone(),
                    latency,
                }
            })
            .collect()
    }

    /// Lowest-latency successful probe. Ties go to the earlier mirror.
    pub fn fastest(probes: &[MirrorProbe]) -> Option<&MirrorProbe> {
        probes
            .iter()
            .filter_map(|p| p.latency.map(|l| (l, p)))
            .min_by_key(|(latency, _)| *latency)
            .map(|(_, p)| p)
    }

    /// Base URL to fetch `document` from.
    ///
    /// Falls back to `default_mirror` when no mirror is configured or every
    /// probe fails.
    pub fn select<T: HttpTransport + ?Sized>(
        &self,
        transport: &T,
        mirrors: &[String],
        default_mirror: &str,
        document: &str,
    ) -> String {
        if mirrors.is_empty() {
            return default_mirror.to_string();
        }

        let probes = self.probe(transport, mirrors, document);
        match Self::fastest(&probes) {
            Some(best) => {
                info!(
                    mirror = %best.base_url,
                    latency_ms = best.latency.map(|l| l.as_millis() as u64).unwrap_or(0),
                    "Selected mirror"
                );
                best.base_url.clone()
            }
            None => {
                warn!(fallback = %default_mirror, "No mirror reachable, using default");
                default_mirror.to_string()
            }
        }
    }
}
