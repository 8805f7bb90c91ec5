//! Remote buckets and verified blob replication for relkit.
//!
//! `connect` turns a configured bucket location into an `ObjectStore`: a
//! local directory for `file://` endpoints, or `HttpObjectStore` for
//! `http(s)://` endpoints. `Replicator` copies the VM image artefact of each
//! release into every replica bucket that serves its platform, verifying the
//! copy by size and checksum.

pub mod config;
pub mod http;
pub mod replicate;

pub use config::{connect, RemoteConfig};
pub use http::HttpObjectStore;
pub use replicate::{
    artefact_key, ReplicationOptions, ReplicationReport, ReplicationTarget, Replicator,
};

/// Protocol version sent as `X-Relkit-Protocol` on every HTTP request.
pub const PROTOCOL_VERSION: u32 = 1;

use relkit_schema::{ConfigError, ManifestError};
use relkit_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Manifest(#[from] ManifestError),
    #[error("unsupported bucket endpoint '{0}'")]
    UnsupportedEndpoint(String),
    #[error("no VM image artefact known for platform '{0}'")]
    UnknownPlatform(String),
    #[error("integrity failure for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
}
