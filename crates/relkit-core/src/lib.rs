//! Run orchestration for relkit: the publish pipeline and everything it drives.
//!
//! A `RunContext` is built once per run from a publishing configuration and
//! owns the manifest stores, the blob replicator, the per-platform publishers
//! and the component-descriptor service. `PublishPipeline` walks the three
//! phases (`sync-images`, `publish-images`, `publish-component-descriptor`)
//! over the manifests of one release, and `cleanup_releases` rolls published
//! images back.

pub mod cleanup;
pub mod commit;
pub mod context;
pub mod descriptor;
pub mod phase;
pub mod pipeline;
pub mod publisher;

pub use cleanup::{cleanup_releases, CleanupReport};
pub use commit::expand_commit;
pub use context::RunContext;
pub use descriptor::{
    build_component_descriptor, ComponentDescriptor, DescriptorService, Resource,
    StoreDescriptorService, DESCRIPTOR_KEY_PREFIX,
};
pub use phase::Phase;
pub use pipeline::{
    MissingCfgPolicy, PipelineReport, PublishOptions, PublishPipeline, ReleaseRef,
};
pub use publisher::{publish_image, ExecPublisher, PublishError, Publisher, PublisherRegistry};

use relkit_remote::RemoteError;
use relkit_schema::{ConfigError, FeatureError, ManifestError, VersionError};
use relkit_store::StoreError;
use thiserror::Error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("feature resolution failed: {0}")]
    Feature(#[from] FeatureError),
    #[error("version error: {0}")]
    Version(#[from] VersionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("no matching releases found: {0}")]
    NoReleases(String),
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("replicas are not ready: {0}")]
    ReplicasNotReady(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Process exit code for this error.
    ///
    /// `1` covers missing releases, missing configuration and failed
    /// validation as well as anything unclassified; `2` is an unreadable
    /// manifest or config document; `3` is a store or transfer failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(ConfigError::Yaml(_)) | Self::Manifest(_) => EXIT_MANIFEST_ERROR,
            Self::Store(e) => store_exit_code(e),
            Self::Remote(e) => match e {
                RemoteError::Store(s) => store_exit_code(s),
                RemoteError::Manifest(_) | RemoteError::Config(ConfigError::Yaml(_)) => {
                    EXIT_MANIFEST_ERROR
                }
                RemoteError::Config(_) | RemoteError::UnsupportedEndpoint(_) => EXIT_FAILURE,
                _ => EXIT_STORE_ERROR,
            },
            _ => EXIT_FAILURE,
        }
    }
}

fn store_exit_code(e: &StoreError) -> u8 {
    match e {
        StoreError::Manifest { .. } => EXIT_MANIFEST_ERROR,
        e if e.is_not_found() => EXIT_FAILURE,
        _ => EXIT_STORE_ERROR,
    }
}
