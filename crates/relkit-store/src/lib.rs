//! Object-store port, manifest index, replica comparison and garbage collection for relkit.
//!
//! Everything relkit persists lives in buckets behind the async `ObjectStore`
//! port: release manifests and manifest sets under `meta/`, build artefacts
//! anywhere else. `FsObjectStore` and `MemoryObjectStore` implement the port
//! locally; `ManifestStore` is the manifest index on top of it; and
//! `GarbageCollector` purges stale manifests and unreachable blobs.

pub mod fs;
pub mod gc;
pub mod integrity;
pub mod manifests;
pub mod memory;
pub mod objects;

pub use fs::{file_byte_stream, FsObjectStore};
pub use gc::{
    GarbageCollector, PurgeReport, SweepReport, DEFAULT_BLOB_PREFIX, DEFAULT_MAX_AGE_DAYS,
};
pub use integrity::{compare_replica, heads_match, ReplicaStatus};
pub use manifests::{manifest_set_name, ManifestStore};
pub use memory::MemoryObjectStore;
pub use objects::{
    content_checksum, list_keys, list_pages, ByteStream, ListPage, ObjectHead, ObjectStore,
    CONTENT_TYPE_OCTET_STREAM, CONTENT_TYPE_YAML,
};

use relkit_schema::{FeatureError, ManifestError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("invalid stored document '{key}': {source}")]
    Manifest {
        key: String,
        #[source]
        source: ManifestError,
    },
    #[error("feature resolution failed: {0}")]
    Feature(#[from] FeatureError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Timeouts, dropped connections and short reads; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Fan-out limits for the bounded worker pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency {
    /// Concurrent manifest fetches during enumeration.
    pub manifests: usize,
    /// Concurrent manifest-set fetches during enumeration.
    pub manifest_sets: usize,
    /// Concurrent deletions.
    pub deletions: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            manifests: 64,
            manifest_sets: 16,
            deletions: 64,
        }
    }
}
