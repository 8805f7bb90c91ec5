//! Release identity, manifests and publishing configuration for relkit.
//!
//! This crate is the pure data layer: release identifiers and their canonical
//! manifest keys (`ReleaseIdentifier`), persisted manifests and manifest sets
//! (`ReleaseManifest`, `ReleaseManifestSet`), flavour sets, epoch/version
//! arithmetic, publishing configuration, and the feature-resolution port used
//! to canonicalise flavour names.

pub mod config;
pub mod flavour;
pub mod identity;
pub mod manifest;
pub mod normalize;
pub mod types;
pub mod version;

pub use config::{
    BucketLocation, BuildresultBucket, BuildresultBucketRole, ConfigError, ManifestBucket,
    ManifestBucketRole, OcmCfg, PublishingCfg, PublishingCfgs, PublishingTarget,
    PublishingVersion, PublishingVersions, TargetCommands,
};
pub use flavour::{vm_image_suffix, Flavour, FlavourCombination, FlavourSet, FlavourSets};
pub use identity::{
    Architecture, ReleaseIdentifier, KEY_COMMIT_LEN, MANIFEST_KEY_PREFIX, MANIFEST_SET_KEY_PREFIX,
};
pub use manifest::{
    already_published, parse_timestamp, LogReference, ManifestError, PublishedImageMetadata,
    ReleaseFile, ReleaseManifest, ReleaseManifestSet, ReleaseTestResult, TestResultCode,
};
pub use normalize::{
    compose_canonical_name, normalise_modifiers, CommandFeatureResolver, FeatureError,
    FeatureResolver, FeatureTable, MemoizingResolver, SortedFeatureResolver,
    TableFeatureResolver,
};
pub use types::{BucketName, CommitHash, ObjectKey};
pub use version::{BuildType, VersionError};
