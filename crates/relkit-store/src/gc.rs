//! Age-based manifest purges and reachability sweeps of build artefacts.
//!
//! Liveness is recomputed from scratch on every sweep: an object survives
//! only if some manifest or manifest set currently in the store references
//! its key. Purging a manifest does not delete the objects it references;
//! a later orphan sweep picks those up.

use crate::manifests::ManifestStore;
use crate::objects::{list_pages, ObjectStore};
use crate::StoreError;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use relkit_schema::ObjectKey;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_AGE_DAYS: i64 = 14;

/// Default prefix of build artefacts in a buildresult bucket.
pub const DEFAULT_BLOB_PREFIX: &str = "objects/";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub examined: usize,
    pub expired: Vec<ObjectKey>,
    pub deleted: usize,
    /// Manifest sets without members; they have no age and are left alone.
    pub skipped_empty: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub reachable: usize,
    pub listed: usize,
    pub orphaned: Vec<ObjectKey>,
    pub deleted: usize,
}

pub struct GarbageCollector {
    manifests: ManifestStore,
    blobs: Arc<dyn ObjectStore>,
    dry_run: bool,
}

fn with_slash(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_owned()
    } else {
        format!("{prefix}/")
    }
}

impl GarbageCollector {
    /// `blobs` is the bucket swept for orphans; it may be the manifest bucket itself.
    pub fn new(manifests: ManifestStore, blobs: Arc<dyn ObjectStore>) -> Self {
        Self {
            manifests,
            blobs,
            dry_run: false,
        }
    }

    /// Log every deletion instead of performing it.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns whether the key was actually deleted.
    async fn delete_one(&self, store: &dyn ObjectStore, key: &ObjectKey) -> Result<bool, StoreError> {
        if self.dry_run {
            info!("dry run: would delete {}/{key}", store.bucket());
            return Ok(false);
        }
        store.delete(key).await?;
        debug!("deleted {}/{key}", store.bucket());
        Ok(true)
    }

    async fn delete_all(&self, keys: &[ObjectKey]) -> Result<usize, StoreError> {
        let store = self.manifests.object_store().as_ref();
        let outcomes: Vec<bool> = stream::iter(keys)
            .map(|key| self.delete_one(store, key))
            .buffer_unordered(self.manifests.concurrency().deletions)
            .try_collect()
            .await?;
        Ok(outcomes.into_iter().filter(|deleted| *deleted).count())
    }

    /// Delete single manifests under `prefix` built more than `max_age` before `now`.
    pub async fn purge_manifests(
        &self,
        prefix: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<PurgeReport, StoreError> {
        let mut report = PurgeReport::default();
        let mut manifests = self.manifests.enumerate(prefix);
        while let Some(manifest) = manifests.try_next().await? {
            report.examined += 1;
            let key = manifest.s3_key.clone().unwrap_or_default();
            let built = manifest.build_ts().map_err(|source| StoreError::Manifest {
                key: key.to_string(),
                source,
            })?;
            if now.signed_duration_since(built) > max_age {
                report.expired.push(key);
            }
        }
        drop(manifests);

        report.deleted = self.delete_all(&report.expired).await?;
        info!(
            "purged {} of {} manifests under {prefix} ({} expired)",
            report.deleted,
            report.examined,
            report.expired.len()
        );
        Ok(report)
    }

    /// Delete manifest sets under `prefix` whose first member is older than `max_age`.
    pub async fn purge_manifest_sets(
        &self,
        prefix: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<PurgeReport, StoreError> {
        let mut report = PurgeReport::default();
        let mut sets = self.manifests.enumerate_sets(prefix);
        while let Some(set) = sets.try_next().await? {
            report.examined += 1;
            let key = set.s3_key.clone().unwrap_or_default();
            let built = set
                .representative_timestamp()
                .map_err(|source| StoreError::Manifest {
                    key: key.to_string(),
                    source,
                })?;
            let Some(built) = built else {
                info!("manifest set {key} has no members, skipping");
                report.skipped_empty += 1;
                continue;
            };
            if now.signed_duration_since(built) > max_age {
                report.expired.push(key);
            }
        }
        drop(sets);

        report.deleted = self.delete_all(&report.expired).await?;
        info!(
            "purged {} of {} manifest sets under {prefix} ({} expired, {} empty)",
            report.deleted,
            report.examined,
            report.expired.len(),
            report.skipped_empty
        );
        Ok(report)
    }

    /// Keys referenced by every manifest and manifest set in the store, logs included.
    pub async fn reachable_keys(&self) -> Result<HashSet<ObjectKey>, StoreError> {
        let mut reachable = HashSet::new();

        let manifest_prefix = with_slash(self.manifests.manifest_prefix());
        let mut manifests = self.manifests.enumerate(&manifest_prefix);
        while let Some(manifest) = manifests.try_next().await? {
            reachable.extend(manifest.referenced_keys().cloned());
        }
        drop(manifests);

        let set_prefix = with_slash(self.manifests.set_prefix());
        let mut sets = self.manifests.enumerate_sets(&set_prefix);
        while let Some(set) = sets.try_next().await? {
            reachable.extend(set.referenced_keys().cloned());
        }
        Ok(reachable)
    }

    /// Delete every object under `blob_prefix` that no manifest or manifest set references.
    ///
    /// Works page by page: each listed page is diffed against the reachable
    /// set and its orphans are removed with one batch delete.
    pub async fn sweep_orphans(&self, blob_prefix: &str) -> Result<SweepReport, StoreError> {
        let reachable = self.reachable_keys().await?;
        let manifest_prefix = with_slash(self.manifests.manifest_prefix());
        let set_prefix = with_slash(self.manifests.set_prefix());
        let mut report = SweepReport {
            reachable: reachable.len(),
            ..SweepReport::default()
        };

        let mut pages = list_pages(self.blobs.as_ref(), blob_prefix);
        while let Some(page) = pages.try_next().await? {
            report.listed += page.keys.len();
            let orphans: Vec<ObjectKey> = page
                .keys
                .into_iter()
                .filter(|k| !k.starts_with(&manifest_prefix) && !k.starts_with(&set_prefix))
                .filter(|k| !reachable.contains(k))
                .collect();
            if orphans.is_empty() {
                continue;
            }
            if self.dry_run {
                for key in &orphans {
                    info!("dry run: would delete orphan {}/{key}", self.blobs.bucket());
                }
            } else {
                self.blobs.delete_batch(&orphans).await?;
                report.deleted += orphans.len();
            }
            report.orphaned.extend(orphans);
        }

        info!(
            "orphan sweep of {}/{blob_prefix}: {} listed, {} reachable, {} orphaned, {} deleted",
            self.blobs.bucket(),
            report.listed,
            report.reachable,
            report.orphaned.len(),
            report.deleted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryObjectStore;
    use chrono::TimeZone;
    use relkit_schema::{
        Architecture, BucketName, CommitHash, ReleaseFile, ReleaseIdentifier, ReleaseManifest,
        ReleaseManifestSet, SortedFeatureResolver,
    };

    fn manifest(platform: &str, built: &str, keys: &[&str]) -> ReleaseManifest {
        ReleaseManifest {
            identifier: ReleaseIdentifier {
                commit: CommitHash::new("abc1234567890abcdef1234567890abcdeadbeef"),
                version: "318.9".to_owned(),
                epoch: 318,
                architecture: Architecture::Arm64,
                platform: platform.to_owned(),
                modifiers: Vec::new(),
            },
            build_timestamp: built.to_owned(),
            paths: keys
                .iter()
                .map(|k| ReleaseFile {
                    name: (*k).to_owned(),
                    suffix: ".raw".to_owned(),
                    md5sum: None,
                    sha256sum: None,
                    s3_key: ObjectKey::new(*k),
                    s3_bucket_name: BucketName::new("builds"),
                })
                .collect(),
            base_image: None,
            published_image_metadata: None,
            test_result: None,
            logs: None,
            s3_key: None,
            s3_bucket: None,
        }
    }

    fn setup() -> (Arc<MemoryObjectStore>, ManifestStore) {
        let objects = Arc::new(MemoryObjectStore::new("builds"));
        let manifests = ManifestStore::new(objects.clone(), Arc::new(SortedFeatureResolver));
        (objects, manifests)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn purge_deletes_only_expired_manifests() {
        let (objects, manifests) = setup();
        let old = manifests
            .upload(&manifest("aws", "2024-01-01T00:00:00Z", &[]))
            .await
            .unwrap();
        let fresh = manifests
            .upload(&manifest("gcp", "2024-01-30T00:00:00Z", &[]))
            .await
            .unwrap();

        let gc = GarbageCollector::new(manifests, objects.clone());
        let report = gc
            .purge_manifests("meta/singles/", Duration::days(DEFAULT_MAX_AGE_DAYS), now())
            .await
            .unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.expired, vec![old.clone()]);
        assert_eq!(report.deleted, 1);
        assert!(objects.contents(&old).is_none());
        assert!(objects.contents(&fresh).is_some());
    }

    #[tokio::test]
    async fn dry_run_purge_keeps_everything() {
        let (objects, manifests) = setup();
        let old = manifests
            .upload(&manifest("aws", "2024-01-01T00:00:00Z", &[]))
            .await
            .unwrap();

        let gc = GarbageCollector::new(manifests, objects.clone()).dry_run(true);
        let report = gc
            .purge_manifests("meta/singles/", Duration::days(DEFAULT_MAX_AGE_DAYS), now())
            .await
            .unwrap();

        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.deleted, 0);
        assert!(objects.contents(&old).is_some());
        assert_eq!(objects.calls("delete"), 0);
    }

    #[tokio::test]
    async fn empty_manifest_set_is_skipped() {
        let (objects, manifests) = setup();
        manifests
            .put_set("meta/sets/snapshot/empty", &ReleaseManifestSet::new("all", Vec::new()))
            .await
            .unwrap();
        let old = ReleaseManifestSet::new(
            "all",
            vec![manifest("aws", "2023-12-01 08:00:00", &[])],
        );
        manifests
            .put_set("meta/sets/snapshot/old", &old)
            .await
            .unwrap();

        let gc = GarbageCollector::new(manifests, objects.clone());
        let report = gc
            .purge_manifest_sets("meta/sets/snapshot/", Duration::days(14), now())
            .await
            .unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.deleted, 1);
        assert!(objects.contents("meta/sets/snapshot/empty").is_some());
        assert!(objects.contents("meta/sets/snapshot/old").is_none());
    }

    #[tokio::test]
    async fn sweep_keeps_manifests_in_shared_bucket() {
        let (objects, manifests) = setup();
        let key = manifests
            .upload(&manifest("aws", "2024-01-30T00:00:00Z", &["objects/o1"]))
            .await
            .unwrap();
        objects.insert("objects/o1", vec![1]);
        objects.insert("objects/o2", vec![2]);

        let gc = GarbageCollector::new(manifests, objects.clone());
        let report = gc.sweep_orphans("").await.unwrap();

        assert_eq!(report.orphaned, vec![ObjectKey::new("objects/o2")]);
        assert!(objects.contents(&key).is_some());
        assert!(objects.contents("objects/o1").is_some());
    }

    #[tokio::test]
    async fn dry_run_sweep_deletes_nothing() {
        let (objects, manifests) = setup();
        objects.insert("objects/o1", vec![1]);

        let gc = GarbageCollector::new(manifests, objects.clone()).dry_run(true);
        let report = gc.sweep_orphans(DEFAULT_BLOB_PREFIX).await.unwrap();

        assert_eq!(report.orphaned.len(), 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(objects.calls("delete_batch"), 0);
        assert!(objects.contents("objects/o1").is_some());
    }
}
