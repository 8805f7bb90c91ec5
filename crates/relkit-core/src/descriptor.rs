//! Component descriptors: one document describing every image of a release.

use crate::CoreError;
use async_trait::async_trait;
use relkit_schema::{vm_image_suffix, CommitHash, OcmCfg, ReleaseFile, ReleaseManifest};
use relkit_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Prefix descriptors are stored under: `<prefix>/<component>/<version>.json`.
pub const DESCRIPTOR_KEY_PREFIX: &str = "component-descriptors";

const SCHEMA_VERSION: &str = "v2";
const CONTENT_TYPE_JSON: &str = "application/json";
const SOURCE_NAME: &str = "os-image-source";
const VM_IMAGE_RESOURCE: &str = "vm-image";
const VM_IMAGE_TYPE: &str = "virtual_machine_image";
const ROOTFS_RESOURCE: &str = "rootfs";
const ROOTFS_TYPE: &str = "application/tar+vm-image-rootfs";
const ROOTFS_SUFFIX: &str = ".tar";
const LABEL_BUILD_METADATA: &str = "relkit/build-metadata";
const LABEL_PUBLISHED_IMAGE: &str = "relkit/published-image-metadata";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub meta: DescriptorMeta,
    pub component: Component,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorMeta {
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    pub repository_contexts: Vec<RepositoryContext>,
    pub sources: Vec<Source>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContext {
    pub base_url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub version: String,
    pub commit: CommitHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccess {
    pub bucket_name: String,
    pub object_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub extra_identity: BTreeMap<String, String>,
    pub labels: Vec<Label>,
    pub access: ResourceAccess,
}

impl ComponentDescriptor {
    /// Commit of the first source, i.e. what the release was built from.
    pub fn commit(&self) -> Option<&CommitHash> {
        self.component.sources.first().map(|s| &s.commit)
    }

    pub fn storage_key(&self) -> String {
        descriptor_key(&self.component.name, &self.component.version)
    }
}

fn descriptor_key(component: &str, version: &str) -> String {
    format!("{DESCRIPTOR_KEY_PREFIX}/{component}/{version}.json")
}

fn extra_identity(manifest: &ReleaseManifest) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "feature-flags".to_owned(),
            manifest.identifier.modifiers.join(","),
        ),
        (
            "architecture".to_owned(),
            manifest.identifier.architecture.to_string(),
        ),
        ("platform".to_owned(), manifest.platform().to_owned()),
    ])
}

fn build_metadata_label(manifest: &ReleaseManifest) -> Label {
    Label {
        name: LABEL_BUILD_METADATA.to_owned(),
        value: serde_json::json!({
            "modifiers": manifest.identifier.modifiers,
            "buildTimestamp": manifest.build_timestamp,
        }),
    }
}

fn resource(
    name: &str,
    kind: &str,
    version: &str,
    manifest: &ReleaseManifest,
    file: &ReleaseFile,
    labels: Vec<Label>,
) -> Resource {
    Resource {
        name: name.to_owned(),
        version: version.to_owned(),
        kind: kind.to_owned(),
        extra_identity: extra_identity(manifest),
        labels,
        access: ResourceAccess {
            bucket_name: file.s3_bucket_name.to_string(),
            object_key: file.s3_key.to_string(),
        },
    }
}

/// Descriptor for `manifests`: a VM image resource per manifest, plus a
/// rootfs resource for manifests that ship a `.tar` rootfs.
pub fn build_component_descriptor(
    version: &str,
    commit: &CommitHash,
    ocm: &OcmCfg,
    manifests: &[ReleaseManifest],
) -> Result<ComponentDescriptor, CoreError> {
    let mut resources = Vec::with_capacity(manifests.len() * 2);
    for manifest in manifests {
        let suffix = vm_image_suffix(manifest.platform()).ok_or_else(|| {
            CoreError::Validation(format!(
                "no VM image artefact known for platform '{}'",
                manifest.platform()
            ))
        })?;
        let image = manifest.path_by_suffix(suffix)?;

        let mut labels = vec![build_metadata_label(manifest)];
        if let Some(published) = &manifest.published_image_metadata {
            labels.push(Label {
                name: LABEL_PUBLISHED_IMAGE.to_owned(),
                value: serde_json::to_value(published)?,
            });
        }
        resources.push(resource(
            VM_IMAGE_RESOURCE,
            VM_IMAGE_TYPE,
            version,
            manifest,
            image,
            labels,
        ));

        if let Ok(rootfs) = manifest.path_by_suffix(ROOTFS_SUFFIX) {
            resources.push(resource(
                ROOTFS_RESOURCE,
                ROOTFS_TYPE,
                version,
                manifest,
                rootfs,
                vec![build_metadata_label(manifest)],
            ));
        }
    }

    Ok(ComponentDescriptor {
        meta: DescriptorMeta {
            schema_version: SCHEMA_VERSION.to_owned(),
        },
        component: Component {
            name: ocm.component_name.clone(),
            version: version.to_owned(),
            repository_contexts: vec![RepositoryContext {
                base_url: ocm.ocm_repository.clone(),
                kind: "OCIRegistry".to_owned(),
            }],
            sources: vec![Source {
                name: SOURCE_NAME.to_owned(),
                version: version.to_owned(),
                commit: commit.clone(),
            }],
            resources,
        },
    })
}

/// Builds and stores component descriptors.
#[async_trait]
pub trait DescriptorService: Send + Sync {
    fn build(
        &self,
        version: &str,
        commit: &CommitHash,
        ocm: &OcmCfg,
        manifests: &[ReleaseManifest],
    ) -> Result<ComponentDescriptor, CoreError> {
        build_component_descriptor(version, commit, ocm, manifests)
    }

    /// Store `descriptor`. An existing descriptor for the same component and
    /// version is replaced only when `overwrite` is set. Returns whether
    /// anything was written.
    async fn upload(
        &self,
        descriptor: &ComponentDescriptor,
        overwrite: bool,
    ) -> Result<bool, CoreError>;

    async fn fetch(
        &self,
        component: &str,
        version: &str,
    ) -> Result<Option<ComponentDescriptor>, CoreError>;
}

/// Keeps descriptors as JSON objects in a bucket.
pub struct StoreDescriptorService {
    store: Arc<dyn ObjectStore>,
}

impl StoreDescriptorService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DescriptorService for StoreDescriptorService {
    async fn upload(
        &self,
        descriptor: &ComponentDescriptor,
        overwrite: bool,
    ) -> Result<bool, CoreError> {
        let key = descriptor.storage_key();
        if !overwrite && self.store.head(&key).await?.is_some() {
            info!(
                "component descriptor {}/{key} exists, keeping it",
                self.store.bucket()
            );
            return Ok(false);
        }
        let body = serde_json::to_vec_pretty(descriptor)?;
        self.store.put(&key, body, CONTENT_TYPE_JSON).await?;
        info!("uploaded component descriptor to {}/{key}", self.store.bucket());
        Ok(true)
    }

    async fn fetch(
        &self,
        component: &str,
        version: &str,
    ) -> Result<Option<ComponentDescriptor>, CoreError> {
        let key = descriptor_key(component, version);
        match self.store.get(&key).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relkit_store::MemoryObjectStore;

    const MANIFEST: &str = r"
build_committish: abc1234567890abcdef1234567890abcdeadbeef
version: '318.9'
gardenlinux_epoch: 318
architecture: amd64
platform: aws
modifiers: [_prod, server]
build_timestamp: '2024-01-05T10:11:12'
paths:
  - name: image
    suffix: .raw
    s3_key: objects/aws-image.raw
    s3_bucket_name: gl-builds
  - name: rootfs
    suffix: .tar
    s3_key: objects/aws-rootfs.tar
    s3_bucket_name: gl-builds
published_image_metadata:
  type: oci
  image_reference: registry.example.com/gl:318.9
";

    fn commit() -> CommitHash {
        CommitHash::new("abc1234567890abcdef1234567890abcdeadbeef")
    }

    fn ocm() -> OcmCfg {
        OcmCfg {
            ocm_repository: "registry.example.com/components".to_owned(),
            ..OcmCfg::default()
        }
    }

    #[test]
    fn describes_image_and_rootfs_of_each_manifest() {
        let m = ReleaseManifest::from_yaml_str(MANIFEST).unwrap();
        let d = build_component_descriptor("318.9", &commit(), &ocm(), &[m]).unwrap();

        assert_eq!(d.component.name, "os-image");
        assert_eq!(d.commit(), Some(&commit()));
        assert_eq!(d.storage_key(), "component-descriptors/os-image/318.9.json");

        let kinds: Vec<&str> = d.component.resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec![VM_IMAGE_TYPE, ROOTFS_TYPE]);

        let image = &d.component.resources[0];
        assert_eq!(image.access.object_key, "objects/aws-image.raw");
        assert_eq!(image.access.bucket_name, "gl-builds");
        assert_eq!(image.extra_identity["feature-flags"], "_prod,server");
        assert_eq!(image.extra_identity["architecture"], "amd64");
        assert_eq!(image.labels.len(), 2);
        assert_eq!(image.labels[1].value["type"], "oci");
        assert_eq!(d.component.resources[1].labels.len(), 1);
    }

    #[test]
    fn manifest_without_image_artefact_is_an_error() {
        let yaml = MANIFEST.replace("suffix: .raw", "suffix: .qcow2");
        let m = ReleaseManifest::from_yaml_str(&yaml).unwrap();
        let err = build_component_descriptor("318.9", &commit(), &ocm(), &[m]).unwrap_err();
        assert!(matches!(err, CoreError::Manifest(_)));
    }

    #[tokio::test]
    async fn upload_keeps_existing_descriptor_unless_overwriting() {
        let store = Arc::new(MemoryObjectStore::new("gl-manifests"));
        let service = StoreDescriptorService::new(store.clone());
        let m = ReleaseManifest::from_yaml_str(MANIFEST).unwrap();
        let first = service.build("318.9", &commit(), &ocm(), &[m.clone()]).unwrap();
        assert!(service.upload(&first, false).await.unwrap());

        let mut second = first.clone();
        second.component.resources.clear();
        assert!(!service.upload(&second, false).await.unwrap());
        let stored = service.fetch("os-image", "318.9").await.unwrap().unwrap();
        assert_eq!(stored, first);

        assert!(service.upload(&second, true).await.unwrap());
        let stored = service.fetch("os-image", "318.9").await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(
            store.content_type("component-descriptors/os-image/318.9.json").as_deref(),
            Some("application/json")
        );
        assert!(service.fetch("os-image", "1.0").await.unwrap().is_none());
    }
}
