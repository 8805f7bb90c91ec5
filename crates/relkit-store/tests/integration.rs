//! Manifest store and garbage collection over the filesystem backend.

use futures::TryStreamExt;
use relkit_schema::{
    Architecture, BucketName, BuildType, CommitHash, LogReference, ObjectKey, ReleaseFile,
    ReleaseIdentifier, ReleaseManifest, ReleaseManifestSet, SortedFeatureResolver,
};
use relkit_store::{FsObjectStore, GarbageCollector, ManifestStore, ObjectStore};
use std::sync::Arc;

const COMMIT: &str = "abc1234567890abcdef1234567890abcdeadbeef";

fn identifier(arch: Architecture, platform: &str, modifiers: &[&str]) -> ReleaseIdentifier {
    ReleaseIdentifier {
        commit: CommitHash::new(COMMIT),
        version: "318.9".to_owned(),
        epoch: 318,
        architecture: arch,
        platform: platform.to_owned(),
        modifiers: modifiers.iter().map(|m| (*m).to_owned()).collect(),
    }
}

fn file(key: &str) -> ReleaseFile {
    ReleaseFile {
        name: key.rsplit('/').next().unwrap_or(key).to_owned(),
        suffix: ".raw".to_owned(),
        md5sum: None,
        sha256sum: None,
        s3_key: ObjectKey::new(key),
        s3_bucket_name: BucketName::new("builds"),
    }
}

fn manifest_for(id: ReleaseIdentifier, keys: &[&str]) -> ReleaseManifest {
    ReleaseManifest {
        identifier: id,
        build_timestamp: "2024-01-05T10:11:12Z".to_owned(),
        paths: keys.iter().map(|k| file(k)).collect(),
        base_image: None,
        published_image_metadata: None,
        test_result: None,
        logs: None,
        s3_key: None,
        s3_bucket: None,
    }
}

fn setup() -> (tempfile::TempDir, Arc<FsObjectStore>, ManifestStore) {
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(FsObjectStore::new(dir.path(), "builds").with_page_size(3));
    let manifests = ManifestStore::new(objects.clone(), Arc::new(SortedFeatureResolver));
    (dir, objects, manifests)
}

#[tokio::test]
async fn put_then_get_preserves_identity_for_every_flavour() {
    let (_dir, _objects, manifests) = setup();
    let ids = [
        identifier(Architecture::Amd64, "aws", &[]),
        identifier(Architecture::Amd64, "aws", &["server", "_prod"]),
        identifier(Architecture::Arm64, "aws", &["_prod", "server"]),
        identifier(Architecture::Amd64, "gcp", &["gardener", "_prod", "gardener"]),
        identifier(Architecture::Arm64, "metal", &["_pxe"]),
    ];

    for id in &ids {
        let key = manifests.manifest_key(id).unwrap();
        manifests
            .put(&key, &manifest_for(id.clone(), &[]))
            .await
            .unwrap();
        let fetched = manifests.get(id).await.unwrap().unwrap();
        assert_eq!(
            fetched.identifier.normalised(manifests.resolver()).unwrap(),
            id.normalised(manifests.resolver()).unwrap()
        );
    }
}

#[tokio::test]
async fn modifier_order_does_not_change_the_key() {
    let (_dir, _objects, manifests) = setup();
    let a = identifier(Architecture::Amd64, "aws", &["server", "_prod"]);
    let b = identifier(Architecture::Amd64, "aws", &["_prod", "server"]);
    assert_eq!(
        manifests.manifest_key(&a).unwrap(),
        manifests.manifest_key(&b).unwrap()
    );
}

#[tokio::test]
async fn orphan_sweep_deletes_exactly_unreferenced_objects() {
    let (_dir, objects, manifests) = setup();
    manifests
        .upload(&manifest_for(
            identifier(Architecture::Amd64, "aws", &[]),
            &["objects/o1", "objects/o2"],
        ))
        .await
        .unwrap();
    manifests
        .upload(&manifest_for(
            identifier(Architecture::Amd64, "gcp", &[]),
            &["objects/o2", "objects/o3"],
        ))
        .await
        .unwrap();
    for key in ["objects/o1", "objects/o2", "objects/o3", "objects/o4"] {
        objects
            .put(key, key.as_bytes().to_vec(), "application/octet-stream")
            .await
            .unwrap();
    }

    let gc = GarbageCollector::new(manifests, objects.clone());
    let report = gc.sweep_orphans("objects/").await.unwrap();

    assert_eq!(report.listed, 4);
    assert_eq!(report.orphaned, vec![ObjectKey::new("objects/o4")]);
    assert_eq!(report.deleted, 1);
    for key in ["objects/o1", "objects/o2", "objects/o3"] {
        assert!(objects.head(key).await.unwrap().is_some(), "{key} must survive");
    }
    assert!(objects.head("objects/o4").await.unwrap().is_none());
}

#[tokio::test]
async fn set_logs_and_legacy_manifest_logs_keep_objects_alive() {
    let (_dir, objects, manifests) = setup();
    let mut m = manifest_for(identifier(Architecture::Amd64, "aws", &[]), &[]);
    m.logs = Some(LogReference::Key(ObjectKey::new("objects/build.log")));
    manifests.upload(&m).await.unwrap();

    let set = ReleaseManifestSet::new("all", Vec::new()).with_logfiles([file("objects/set.log")]);
    manifests
        .put_set("meta/sets/release/318.9-all", &set)
        .await
        .unwrap();
    for key in ["objects/build.log", "objects/set.log", "objects/stale"] {
        objects.put(key, vec![0], "text/plain").await.unwrap();
    }

    let gc = GarbageCollector::new(manifests, objects.clone());
    let report = gc.sweep_orphans("objects/").await.unwrap();
    assert_eq!(report.orphaned, vec![ObjectKey::new("objects/stale")]);
}

#[tokio::test]
async fn snapshot_set_lookup_ignores_version() {
    let (_dir, _objects, manifests) = setup();
    let id = identifier(Architecture::Amd64, "aws", &[]);
    let set = ReleaseManifestSet::new("all", vec![manifest_for(id.clone(), &[])]);
    manifests
        .put_set("meta/sets/snapshot/318-abc123-all", &set)
        .await
        .unwrap();

    let mut other_version = id.clone();
    other_version.version = "1.0".to_owned();
    let found = manifests
        .find_set("all", &other_version, BuildType::Snapshot, None, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.flavour_set_name, "all");
    assert_eq!(found.manifests.len(), 1);
}

#[tokio::test]
async fn enumerate_sees_every_manifest_across_pages() {
    let (_dir, _objects, manifests) = setup();
    for platform in ["ali", "aws", "azure", "gcp", "kvm", "metal", "oci"] {
        manifests
            .upload(&manifest_for(
                identifier(Architecture::Amd64, platform, &[]),
                &[],
            ))
            .await
            .unwrap();
    }
    let all: Vec<ReleaseManifest> = manifests
        .enumerate("meta/singles/")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(all.len(), 7);
    assert!(all.iter().all(|m| m.s3_bucket.as_deref() == Some("builds")));
}
