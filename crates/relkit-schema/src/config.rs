//! Publishing configuration: buckets, per-platform targets and OCM settings.
//!
//! `publishing-cfg.yaml` holds a list of named configurations; a run selects one
//! by name. Each bucket carries the endpoint it lives behind so the run can
//! build an object store for it without any further lookup.

use crate::types::{BucketName, CommitHash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    #[error("no publishing cfg named '{0}'")]
    UnknownCfg(String),
    #[error("no flavour set named '{0}'")]
    UnknownFlavourSet(String),
    #[error("no publishing version named '{0}'")]
    UnknownPublishingVersion(String),
    #[error("no publishing target configured for platform '{0}'")]
    MissingTarget(String),
    #[error("no {kind} bucket named '{name}'")]
    UnknownBucket { kind: &'static str, name: String },
    #[error("invalid publishing cfg '{cfg}': {reason}")]
    Invalid { cfg: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestBucketRole {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildresultBucketRole {
    Source,
    Replica,
}

/// Where a bucket lives: endpoint URL (`file://…` or `http(s)://…`) plus credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketLocation {
    pub bucket_name: BucketName,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBucket {
    pub name: String,
    pub role: ManifestBucketRole,
    #[serde(flatten)]
    pub location: BucketLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildresultBucket {
    pub name: String,
    pub role: BuildresultBucketRole,
    #[serde(flatten)]
    pub location: BucketLocation,
    /// Platforms whose artefacts are replicated into this bucket; absent means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
}

impl BuildresultBucket {
    pub fn replicates(&self, platform: &str) -> bool {
        self.platforms
            .as_ref()
            .map_or(true, |p| p.iter().any(|x| x == platform))
    }
}

/// External commands an exec publisher runs for a target (argv form).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTagConfiguration {
    #[serde(default)]
    pub include_version: Option<bool>,
    #[serde(default)]
    pub include_committish: Option<bool>,
    #[serde(default)]
    pub static_tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsAccountTarget {
    pub aws_cfg_name: String,
    pub buildresult_bucket: String,
    #[serde(default)]
    pub copy_regions: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsTarget {
    pub aws_cfgs: Vec<AwsAccountTarget>,
    #[serde(default)]
    pub image_tags: Option<ImageTagConfiguration>,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpTarget {
    pub gcp_cfg_name: String,
    pub gcp_bucket_name: String,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureMarketplaceCfg {
    pub offer_id: String,
    pub publisher_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureTarget {
    pub gallery_cfg_name: String,
    pub storage_account_cfg_name: String,
    pub service_principal_cfg_name: String,
    #[serde(default)]
    pub marketplace_cfg: Option<AzureMarketplaceCfg>,
    #[serde(default)]
    pub publish_to_marketplace: bool,
    #[serde(default)]
    pub publish_to_community_galleries: bool,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackTarget {
    pub environment_cfg_name: String,
    #[serde(default)]
    pub image_properties: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub copy_regions: Option<Vec<String>>,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliyunTarget {
    pub aliyun_cfg_name: String,
    pub oss_bucket_name: String,
    pub aliyun_region: String,
    #[serde(default)]
    pub copy_regions: Option<Vec<String>>,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciTarget {
    pub image_prefix: String,
    #[serde(flatten)]
    pub commands: TargetCommands,
}

/// Per-platform publishing settings, discriminated by `platform`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PublishingTarget {
    Aws(AwsTarget),
    Gcp(GcpTarget),
    Azure(AzureTarget),
    Openstack(OpenstackTarget),
    Openstackbaremetal(OpenstackTarget),
    Ali(AliyunTarget),
    Oci(OciTarget),
}

impl PublishingTarget {
    pub fn platform(&self) -> &'static str {
        match self {
            Self::Aws(_) => "aws",
            Self::Gcp(_) => "gcp",
            Self::Azure(_) => "azure",
            Self::Openstack(_) => "openstack",
            Self::Openstackbaremetal(_) => "openstackbaremetal",
            Self::Ali(_) => "ali",
            Self::Oci(_) => "oci",
        }
    }

    pub fn commands(&self) -> &TargetCommands {
        match self {
            Self::Aws(t) => &t.commands,
            Self::Gcp(t) => &t.commands,
            Self::Azure(t) => &t.commands,
            Self::Openstack(t) | Self::Openstackbaremetal(t) => &t.commands,
            Self::Ali(t) => &t.commands,
            Self::Oci(t) => &t.commands,
        }
    }
}

fn default_component_name() -> String {
    "os-image".to_owned()
}

/// Component-descriptor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcmCfg {
    pub ocm_repository: String,
    #[serde(default = "default_component_name")]
    pub component_name: String,
    #[serde(default)]
    pub overwrite_component_descriptor: bool,
    /// Bucket descriptors are uploaded to; the source manifest bucket when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<BucketLocation>,
}

impl Default for OcmCfg {
    fn default() -> Self {
        Self {
            ocm_repository: String::new(),
            component_name: default_component_name(),
            overwrite_component_descriptor: false,
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingCfg {
    pub name: String,
    pub manifest_s3_buckets: Vec<ManifestBucket>,
    pub buildresult_s3_buckets: Vec<BuildresultBucket>,
    #[serde(default)]
    pub ocm: OcmCfg,
    #[serde(default)]
    pub targets: Vec<PublishingTarget>,
}

impl PublishingCfg {
    pub fn target(&self, platform: &str) -> Option<&PublishingTarget> {
        self.targets.iter().find(|t| t.platform() == platform)
    }

    pub fn require_target(&self, platform: &str) -> Result<&PublishingTarget, ConfigError> {
        self.target(platform)
            .ok_or_else(|| ConfigError::MissingTarget(platform.to_owned()))
    }

    pub fn buildresult_bucket(&self, name: &str) -> Result<&BuildresultBucket, ConfigError> {
        self.buildresult_s3_buckets
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ConfigError::UnknownBucket {
                kind: "buildresult",
                name: name.to_owned(),
            })
    }

    pub fn origin_buildresult_bucket(&self) -> Result<&BuildresultBucket, ConfigError> {
        self.buildresult_s3_buckets
            .iter()
            .find(|b| b.role == BuildresultBucketRole::Source)
            .ok_or_else(|| self.invalid("no buildresult bucket with role 'source'"))
    }

    pub fn replica_buildresult_buckets(&self) -> impl Iterator<Item = &BuildresultBucket> {
        self.buildresult_s3_buckets
            .iter()
            .filter(|b| b.role == BuildresultBucketRole::Replica)
    }

    pub fn source_manifest_bucket(&self) -> Result<&ManifestBucket, ConfigError> {
        self.manifest_s3_buckets
            .iter()
            .find(|b| b.role == ManifestBucketRole::Source)
            .ok_or_else(|| self.invalid("no manifest bucket with role 'source'"))
    }

    pub fn target_manifest_buckets(&self) -> impl Iterator<Item = &ManifestBucket> {
        self.manifest_s3_buckets
            .iter()
            .filter(|b| b.role == ManifestBucketRole::Target)
    }

    /// Exactly one source bucket of each kind, and unique bucket names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origins = self
            .buildresult_s3_buckets
            .iter()
            .filter(|b| b.role == BuildresultBucketRole::Source)
            .count();
        if origins != 1 {
            return Err(self.invalid(&format!(
                "expected exactly one buildresult bucket with role 'source', found {origins}"
            )));
        }

        let sources = self
            .manifest_s3_buckets
            .iter()
            .filter(|b| b.role == ManifestBucketRole::Source)
            .count();
        if sources != 1 {
            return Err(self.invalid(&format!(
                "expected exactly one manifest bucket with role 'source', found {sources}"
            )));
        }

        let mut seen = HashSet::new();
        let names = self
            .manifest_s3_buckets
            .iter()
            .map(|b| &b.name)
            .chain(self.buildresult_s3_buckets.iter().map(|b| &b.name));
        for name in names {
            if !seen.insert(name) {
                return Err(self.invalid(&format!("duplicate bucket name '{name}'")));
            }
        }

        let mut platforms = HashSet::new();
        for t in &self.targets {
            if !platforms.insert(t.platform()) {
                return Err(self.invalid(&format!(
                    "more than one target for platform '{}'",
                    t.platform()
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            cfg: self.name.clone(),
            reason: reason.to_owned(),
        }
    }
}

/// Contents of `publishing-cfg.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishingCfgs {
    pub cfgs: Vec<PublishingCfg>,
}

impl PublishingCfgs {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Named cfg, validated.
    pub fn get(&self, name: &str) -> Result<&PublishingCfg, ConfigError> {
        let cfg = self
            .cfgs
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::UnknownCfg(name.to_owned()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// A named `(version, commit)` pair a publish run can start from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingVersion {
    pub name: String,
    pub version: String,
    pub commit: CommitHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishingVersions {
    pub versions: Vec<PublishingVersion>,
}

impl PublishingVersions {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn get(&self, name: &str) -> Result<&PublishingVersion, ConfigError> {
        self.versions
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConfigError::UnknownPublishingVersion(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const CFG: &str = r"
- name: default
  manifest_s3_buckets:
    - name: manifests
      role: source
      bucket_name: gl-manifests
      endpoint: file:///tmp/store
    - name: manifests-mirror
      role: target
      bucket_name: gl-manifests-mirror
      endpoint: https://mirror.example.com
      auth_token: secret
  buildresult_s3_buckets:
    - name: builds
      role: source
      bucket_name: gl-builds
      endpoint: file:///tmp/store
    - name: builds-cn
      role: replica
      bucket_name: gl-builds-cn
      endpoint: file:///tmp/store
      platforms: [ali]
  ocm:
    ocm_repository: europe-docker.pkg.dev/ocm
    overwrite_component_descriptor: true
  targets:
    - platform: aws
      aws_cfgs:
        - aws_cfg_name: acct
          buildresult_bucket: builds
      publish_command: [aws-publish]
    - platform: gcp
      gcp_cfg_name: gcp
      gcp_bucket_name: bucket
    - platform: openstackbaremetal
      environment_cfg_name: os
- name: broken
  manifest_s3_buckets: []
  buildresult_s3_buckets: []
";

    #[test]
    fn loads_named_cfg_and_resolves_roles() {
        let cfgs = PublishingCfgs::from_yaml_str(CFG).unwrap();
        let cfg = cfgs.get("default").unwrap();

        assert_eq!(cfg.origin_buildresult_bucket().unwrap().name, "builds");
        assert_eq!(cfg.source_manifest_bucket().unwrap().name, "manifests");
        let targets: Vec<&str> = cfg.target_manifest_buckets().map(|b| b.name.as_str()).collect();
        assert_eq!(targets, vec!["manifests-mirror"]);
        let replicas: Vec<&str> = cfg
            .replica_buildresult_buckets()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(replicas, vec!["builds-cn"]);
        assert_eq!(
            cfg.manifest_s3_buckets[1].location.auth_token.as_deref(),
            Some("secret")
        );
        assert!(cfg.ocm.overwrite_component_descriptor);
        assert_eq!(cfg.ocm.component_name, "os-image");
    }

    #[test]
    fn targets_are_tagged_by_platform() {
        let cfgs = PublishingCfgs::from_yaml_str(CFG).unwrap();
        let cfg = cfgs.get("default").unwrap();

        let aws = cfg.require_target("aws").unwrap();
        assert_eq!(aws.platform(), "aws");
        assert_eq!(
            aws.commands().publish_command.as_deref(),
            Some(&["aws-publish".to_owned()][..])
        );
        assert!(aws.commands().cleanup_command.is_none());
        assert!(matches!(
            cfg.require_target("openstackbaremetal"),
            Ok(PublishingTarget::Openstackbaremetal(_))
        ));
        assert!(matches!(
            cfg.require_target("azure"),
            Err(ConfigError::MissingTarget(ref p)) if p == "azure"
        ));
    }

    #[test]
    fn replica_platform_allow_list() {
        let cfgs = PublishingCfgs::from_yaml_str(CFG).unwrap();
        let cfg = cfgs.get("default").unwrap();
        let cn = cfg.buildresult_bucket("builds-cn").unwrap();
        assert!(cn.replicates("ali"));
        assert!(!cn.replicates("aws"));
        assert!(cfg.buildresult_bucket("builds").unwrap().replicates("aws"));
        assert!(cfg.buildresult_bucket("nope").is_err());
    }

    #[test]
    fn invalid_cfg_is_rejected_on_selection() {
        let cfgs = PublishingCfgs::from_yaml_str(CFG).unwrap();
        assert!(matches!(cfgs.get("broken"), Err(ConfigError::Invalid { .. })));
        assert!(matches!(cfgs.get("absent"), Err(ConfigError::UnknownCfg(_))));
    }

    #[test]
    fn duplicate_bucket_names_are_rejected() {
        let mut cfg = PublishingCfgs::from_yaml_str(CFG).unwrap().cfgs.remove(0);
        cfg.buildresult_s3_buckets[1].name = "builds".to_owned();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate bucket name"));
    }

    #[test]
    fn publishing_versions_lookup() {
        let versions = PublishingVersions::from_yaml_str(
            r"
- name: latest
  version: '318.9'
  commit: abc1234567890abcdef1234567890abcdeadbeef
",
        )
        .unwrap();
        let v = versions.get("latest").unwrap();
        assert_eq!(v.version, "318.9");
        assert!(v.commit.is_full());
        assert!(versions.get("other").is_err());
    }
}
