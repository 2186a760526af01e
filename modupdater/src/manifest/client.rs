//! Manifest retrieval.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::document::UpdateManifest;
use super::mirror::{join_url, MirrorSelector};
use crate::config::NetworkConfig;
use crate::download::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::net::HttpTransport;

/// Fetches and parses the remote manifest.
///
/// Every failure (unreachable mirrors, timeouts, error statuses) yields an
/// empty manifest, which the caller treats as "no update available".
pub struct ManifestClient<T: HttpTransport> {
    transport: Arc<T>,
    config: NetworkConfig,
    selector: MirrorSelector,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<T: HttpTransport> ManifestClient<T> {
    /// Client over `transport`, with mirrors and retries from `config`.
    pub fn new(transport: Arc<T>, config: &NetworkConfig) -> Self {
        Self {
            transport,
            selector: MirrorSelector::new(config.probe_timeout),
            policy: config.retry_policy(),
            config: config.clone(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Pick a mirror for the manifest.
    pub fn select_mirror(&self) -> String {
        self.selector.select(
            self.transport.as_ref(),
            &self.config.mirrors,
            &self.config.default_mirror,
            &self.config.manifest_name,
        )
    }

    /// Fetch the manifest, plus release notes for `language` if given.
    pub fn fetch(&self, language: Option<&str>) -> UpdateManifest {
        let mirror = self.select_mirror();
        let url = join_url(&mirror, &self.config.manifest_name);

        let mut manifest = match self.fetch_text(&url) {
            Some(text) => UpdateManifest::parse(&text),
            None => return UpdateManifest::empty(),
        };
        info!(url = %url, entries = manifest.len(), "Fetched update manifest");

        if let Some(language) = language {
            let notes_url = join_url(&mirror, &self.config.notes_name_for(language));
            match self.transport.get_text(&notes_url, self.config.fetch_timeout) {
                Ok(notes) => manifest.set_release_notes(notes),
                Err(e) => debug!(url = %notes_url, error = %e, "No release notes"),
            }
        }

        manifest
    }

    /// GET a document with retries on transient failures.
    fn fetch_text(&self, url: &str) -> Option<String> {
        let mut attempt = 1;
        loop {
            let err = match self.transport.get_text(url, self.config.fetch_timeout) {
                Ok(text) => return Some(text),
                Err(e) => e,
            };

            if !err.is_transient() {
                error!(url, error = %err, "Failed to fetch manifest");
                return None;
            }

            match self.policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    warn!(
                        url,
                        attempt,
                        error = %err,
                        delay_secs = delay.as_secs_f64(),
                        "Manifest fetch failed, retrying"
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                None => {
                    error!(url, attempts = attempt, error = %err, "Failed to fetch manifest");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::RecordingSleeper;
    use crate::net::testing::{FakeTransport, Faults};
    use crate::net::TransportError;
    use crate::track::Track;
    use std::time::Duration;

    const MIRROR: &str = "https://mirror.test/source";

    fn config() -> NetworkConfig {
        NetworkConfig {
            default_mirror: MIRROR.to_string(),
            ..NetworkConfig::default()
        }
    }

    fn client(transport: &Arc<FakeTransport>, sleeper: &Arc<RecordingSleeper>) -> ManifestClient<FakeTransport> {
        ManifestClient::new(Arc::clone(transport), &config())
            .with_sleeper(Arc::clone(sleeper) as Arc<dyn Sleeper>)
    }

    #[test]
    fn test_fetch_manifest_and_notes() {
        let transport = Arc::new(FakeTransport::new());
        transport.serve(&format!("{}/update.txt", MIRROR), "update_ver=1.2.0\n");
        transport.serve(&format!("{}/update_info_en_US.txt", MIRROR), "Fixes\n");
        let sleeper = Arc::new(RecordingSleeper::new());

        let manifest = client(&transport, &sleeper).fetch(Some("en_US"));
        assert_eq!(manifest.version(Track::System), "1.2.0");
        assert_eq!(manifest.release_notes(), Some("Fixes\n"));
    }

    #[test]
    fn test_missing_notes_are_not_an_error() {
        let transport = Arc::new(FakeTransport::new());
        transport.serve(&format!("{}/update.txt", MIRROR), "update_ver=1.2.0\n");
        let sleeper = Arc::new(RecordingSleeper::new());

        let manifest = client(&transport, &sleeper).fetch(Some("de_DE"));
        assert_eq!(manifest.version(Track::System), "1.2.0");
        assert!(manifest.release_notes().is_none());
    }

    #[test]
    fn test_unreachable_manifest_is_empty() {
        let transport = Arc::new(FakeTransport::new());
        let sleeper = Arc::new(RecordingSleeper::new());

        let manifest = client(&transport, &sleeper).fetch(None);
        assert!(manifest.is_empty());
        // 404 is not retried
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let transport = Arc::new(FakeTransport::new());
        transport.serve_with(
            &format!("{}/update.txt", MIRROR),
            "update_ver=1.2.0\n",
            Faults {
                get_error: Some(TransportError::Timeout("fetch".into())),
                ..Faults::default()
            },
        );
        let sleeper = Arc::new(RecordingSleeper::new());

        let manifest = client(&transport, &sleeper).fetch(None);
        assert!(manifest.is_empty());
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn test_fetch_is_idempotent() {
        let transport = Arc::new(FakeTransport::new());
        transport.serve(&format!("{}/update.txt", MIRROR), "update_ver=1.2.0\napp_ver=2\n");
        let sleeper = Arc::new(RecordingSleeper::new());
        let client = client(&transport, &sleeper);

        assert_eq!(client.fetch(None), client.fetch(None));
    }
}
