use crate::identity::{ReleaseIdentifier, MANIFEST_SET_KEY_PREFIX};
use crate::types::{BucketName, ObjectKey};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    #[error("manifest is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("no path with suffix '{suffix}' in manifest for {release}")]
    MissingSuffix { suffix: String, release: String },
    #[error("invalid build timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("published image metadata without 'type' for unknown platform '{0}'")]
    UntaggedMetadata(String),
}

/// One artifact of a release, stored as an object in a buildresult bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub name: String,
    pub suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
    pub s3_key: ObjectKey,
    pub s3_bucket_name: BucketName,
}

/// Build log reference. Older manifests store a bare object key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogReference {
    File(ReleaseFile),
    Key(ObjectKey),
}

impl LogReference {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::File(f) => &f.s3_key,
            Self::Key(k) => k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsPublishedImage {
    pub ami_id: String,
    pub aws_region_id: String,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsPublishedImageSet {
    pub published_aws_images: Vec<AwsPublishedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlicloudPublishedImage {
    pub image_id: String,
    pub region_id: String,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlicloudPublishedImageSet {
    pub published_alicloud_images: Vec<AlicloudPublishedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AzureTransportState {
    #[serde(rename = "provisional")]
    Provisional,
    #[serde(rename = "publishing")]
    Publishing,
    #[serde(rename = "going_live")]
    GoingLive,
    #[serde(rename = "released")]
    Released,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AzureHyperVGeneration {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureMarketplacePublishedImage {
    pub hyper_v_generation: AzureHyperVGeneration,
    pub publish_operation_id: String,
    pub golive_operation_id: String,
    pub urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_state: Option<AzureTransportState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureImageGalleryPublishedImage {
    pub hyper_v_generation: AzureHyperVGeneration,
    #[serde(default)]
    pub community_gallery_image_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzurePublishedImage {
    #[serde(default)]
    pub published_marketplace_images: Vec<AzureMarketplacePublishedImage>,
    #[serde(default)]
    pub published_gallery_images: Vec<AzureImageGalleryPublishedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpPublishedImage {
    pub gcp_image_name: String,
    pub gcp_project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackPublishedImage {
    pub region_name: String,
    pub image_id: String,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackPublishedImageSet {
    pub published_openstack_images: Vec<OpenstackPublishedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciPublishedImage {
    pub image_reference: String,
}

/// Platform-side result of a publish, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PublishedImageMetadata {
    Aws(AwsPublishedImageSet),
    Alicloud(AlicloudPublishedImageSet),
    Azure(AzurePublishedImage),
    Gcp(GcpPublishedImage),
    Openstack(OpenstackPublishedImageSet),
    Oci(OciPublishedImage),
}

impl PublishedImageMetadata {
    /// Reads a metadata block. Blocks written without a `type` field are
    /// discriminated by the platform of the owning manifest.
    pub fn from_value(value: serde_yaml_ng::Value, platform: &str) -> Result<Self, ManifestError> {
        if value.get("type").is_some() {
            return Ok(serde_yaml_ng::from_value(value)?);
        }
        Ok(match platform {
            "aws" => Self::Aws(serde_yaml_ng::from_value(value)?),
            "ali" | "alicloud" => Self::Alicloud(serde_yaml_ng::from_value(value)?),
            "azure" => Self::Azure(serde_yaml_ng::from_value(value)?),
            "gcp" => Self::Gcp(serde_yaml_ng::from_value(value)?),
            "openstack" | "openstackbaremetal" => {
                Self::Openstack(serde_yaml_ng::from_value(value)?)
            }
            "oci" => Self::Oci(serde_yaml_ng::from_value(value)?),
            other => return Err(ManifestError::UntaggedMetadata(other.to_owned())),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Aws(_) => "aws",
            Self::Alicloud(_) => "alicloud",
            Self::Azure(_) => "azure",
            Self::Gcp(_) => "gcp",
            Self::Openstack(_) => "openstack",
            Self::Oci(_) => "oci",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResultCode {
    #[serde(rename = "success")]
    Ok,
    #[serde(rename = "failure")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTestResult {
    pub test_suite_cfg_name: String,
    pub test_result: TestResultCode,
    pub test_timestamp: String,
}

/// Persisted metadata of one release of one flavour.
///
/// `s3_key` and `s3_bucket` are set only on manifests read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawReleaseManifest")]
pub struct ReleaseManifest {
    #[serde(flatten)]
    pub identifier: ReleaseIdentifier,
    pub build_timestamp: String,
    #[serde(default)]
    pub paths: Vec<ReleaseFile>,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub published_image_metadata: Option<PublishedImageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<ReleaseTestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<BucketName>,
}

#[derive(Deserialize)]
struct RawReleaseManifest {
    #[serde(flatten)]
    identifier: ReleaseIdentifier,
    build_timestamp: String,
    #[serde(default)]
    paths: Vec<ReleaseFile>,
    #[serde(default)]
    base_image: Option<String>,
    #[serde(default)]
    published_image_metadata: Option<serde_yaml_ng::Value>,
    #[serde(default)]
    test_result: Option<ReleaseTestResult>,
    #[serde(default)]
    logs: Option<LogReference>,
    #[serde(default)]
    s3_key: Option<ObjectKey>,
    #[serde(default)]
    s3_bucket: Option<BucketName>,
}

impl TryFrom<RawReleaseManifest> for ReleaseManifest {
    type Error = ManifestError;

    fn try_from(raw: RawReleaseManifest) -> Result<Self, Self::Error> {
        let published_image_metadata = match raw.published_image_metadata {
            None | Some(serde_yaml_ng::Value::Null) => None,
            Some(value) => Some(PublishedImageMetadata::from_value(
                value,
                &raw.identifier.platform,
            )?),
        };
        Ok(Self {
            identifier: raw.identifier,
            build_timestamp: raw.build_timestamp,
            paths: raw.paths,
            base_image: raw.base_image,
            published_image_metadata,
            test_result: raw.test_result,
            logs: raw.logs,
            s3_key: raw.s3_key,
            s3_bucket: raw.s3_bucket,
        })
    }
}

impl ReleaseManifest {
    pub fn from_yaml_str(input: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn platform(&self) -> &str {
        &self.identifier.platform
    }

    pub fn path_by_suffix(&self, suffix: &str) -> Result<&ReleaseFile, ManifestError> {
        self.paths
            .iter()
            .find(|p| p.suffix == suffix)
            .ok_or_else(|| ManifestError::MissingSuffix {
                suffix: suffix.to_owned(),
                release: self.identifier.to_string(),
            })
    }

    /// Build timestamp as UTC. Naive timestamps are read as UTC.
    pub fn build_ts(&self) -> Result<DateTime<Utc>, ManifestError> {
        parse_timestamp(&self.build_timestamp)
    }

    /// Every object key this manifest keeps alive.
    pub fn referenced_keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.paths
            .iter()
            .map(|p| &p.s3_key)
            .chain(self.logs.iter().map(LogReference::key))
    }

    /// Copy without store location, as written to a store.
    pub fn stripped(&self) -> Self {
        Self {
            s3_key: None,
            s3_bucket: None,
            ..self.clone()
        }
    }

    pub fn with_location(mut self, key: ObjectKey, bucket: BucketName) -> Self {
        self.s3_key = Some(key);
        self.s3_bucket = Some(bucket);
        self
    }

    pub fn with_test_result(mut self, test_result: ReleaseTestResult) -> Self {
        self.test_result = Some(test_result);
        self
    }

    pub fn with_logfile(mut self, log: ReleaseFile) -> Self {
        self.logs = Some(LogReference::File(log));
        self
    }

    pub fn with_published_image_metadata(
        mut self,
        metadata: Option<PublishedImageMetadata>,
    ) -> Self {
        self.published_image_metadata = metadata;
        self
    }
}

/// Whether `manifest` already carries publish results for `platform`.
///
/// Publishing skips such manifests unless forced; this is what makes re-runs safe.
pub fn already_published(manifest: &ReleaseManifest, platform: &str) -> bool {
    manifest.platform() == platform && manifest.published_image_metadata.is_some()
}

/// All manifests of one build run across its flavour matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifestSet {
    #[serde(default)]
    pub manifests: Vec<ReleaseManifest>,
    pub flavour_set_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<ReleaseFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<BucketName>,
}

impl ReleaseManifestSet {
    pub const KEY_PREFIX: &'static str = MANIFEST_SET_KEY_PREFIX;

    pub fn new(flavour_set_name: impl Into<String>, manifests: Vec<ReleaseManifest>) -> Self {
        Self {
            manifests,
            flavour_set_name: flavour_set_name.into(),
            logs: None,
            s3_key: None,
            s3_bucket: None,
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn with_logfiles(mut self, files: impl IntoIterator<Item = ReleaseFile>) -> Self {
        self.logs.get_or_insert_with(Vec::new).extend(files);
        self
    }

    /// Timestamp of the first member; members of a set are built together.
    pub fn representative_timestamp(&self) -> Result<Option<DateTime<Utc>>, ManifestError> {
        self.manifests
            .first()
            .map(ReleaseManifest::build_ts)
            .transpose()
    }

    pub fn referenced_keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.manifests
            .iter()
            .flat_map(ReleaseManifest::referenced_keys)
            .chain(self.logs.iter().flatten().map(|f| &f.s3_key))
    }

    pub fn stripped(&self) -> Self {
        Self {
            s3_key: None,
            s3_bucket: None,
            ..self.clone()
        }
    }

    pub fn with_location(mut self, key: ObjectKey, bucket: BucketName) -> Self {
        self.s3_key = Some(key);
        self.s3_bucket = Some(bucket);
        self
    }
}

/// RFC 3339, or a naive ISO-8601 date/datetime interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ManifestError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ManifestError::InvalidTimestamp(raw.to_owned()))
}
