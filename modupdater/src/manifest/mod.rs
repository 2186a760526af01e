//! Remote manifest: mirror selection, retrieval and parsing.

mod client;
mod document;
mod mirror;

pub use client::ManifestClient;
pub use document::{UpdateManifest, RELEASE_NOTES_KEY};
pub use mirror::{join_url, MirrorProbe, MirrorSelector};
