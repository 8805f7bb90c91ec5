//! Verified replication of release artefacts into replica buckets.
//!
//! Each (release, replica) pair goes through verify, transfer, post-verify and
//! exposure. A replica that exists but differs from the origin is deleted and
//! copied again. Transfers try a direct stream copy first and fall back to a
//! copy staged in a local temporary file, retried on transient errors only.

use crate::config::connect;
use crate::RemoteError;
use futures::StreamExt;
use relkit_schema::{vm_image_suffix, ObjectKey, PublishingCfg, ReleaseManifest};
use relkit_store::{
    compare_replica, file_byte_stream, ObjectHead, ObjectStore, ReplicaStatus, StoreError,
    CONTENT_TYPE_OCTET_STREAM,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Key of the VM image artefact the platform of `manifest` imports.
pub fn artefact_key(manifest: &ReleaseManifest) -> Result<ObjectKey, RemoteError> {
    let suffix = vm_image_suffix(manifest.platform())
        .ok_or_else(|| RemoteError::UnknownPlatform(manifest.platform().to_owned()))?;
    Ok(manifest.path_by_suffix(suffix)?.s3_key.clone())
}

fn describe(head: &ObjectHead) -> String {
    match &head.checksum {
        Some(checksum) => format!("{} bytes, {checksum}", head.size),
        None => format!("{} bytes", head.size),
    }
}

pub struct ReplicationTarget {
    pub name: String,
    pub store: Arc<dyn ObjectStore>,
    /// Platforms served by this replica; `None` serves all.
    pub platforms: Option<Vec<String>>,
}

impl ReplicationTarget {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
            platforms: None,
        }
    }

    #[must_use]
    pub fn for_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = Some(platforms);
        self
    }

    pub fn replicates(&self, platform: &str) -> bool {
        self.platforms
            .as_ref()
            .map_or(true, |p| p.iter().any(|x| x == platform))
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Attempts of the staged copy before a transient error is given up on.
    pub max_attempts: u32,
    /// Where staged copies are written; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// Back-off unit; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            staging_dir: None,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Copied into a replica that did not have the artefact.
    pub replicated: usize,
    /// Copied over a replica that held a different object.
    pub repaired: usize,
    /// Already present and verified.
    pub skipped: usize,
}

pub struct Replicator {
    source: Arc<dyn ObjectStore>,
    targets: Vec<ReplicationTarget>,
    options: ReplicationOptions,
}

impl Replicator {
    pub fn new(source: Arc<dyn ObjectStore>, targets: Vec<ReplicationTarget>) -> Self {
        Self {
            source,
            targets,
            options: ReplicationOptions::default(),
        }
    }

    /// Origin and replica buckets of a publishing configuration.
    pub fn from_cfg(cfg: &PublishingCfg) -> Result<Self, RemoteError> {
        let source = connect(&cfg.origin_buildresult_bucket()?.location)?;
        let targets = cfg
            .replica_buildresult_buckets()
            .map(|bucket| {
                let target = ReplicationTarget::new(bucket.name.clone(), connect(&bucket.location)?);
                Ok(match &bucket.platforms {
                    Some(platforms) => target.for_platforms(platforms.clone()),
                    None => target,
                })
            })
            .collect::<Result<Vec<_>, RemoteError>>()?;
        Ok(Self::new(source, targets))
    }

    #[must_use]
    pub fn with_options(mut self, options: ReplicationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn targets(&self) -> &[ReplicationTarget] {
        &self.targets
    }

    fn pairs<'a>(
        &'a self,
        manifests: &'a [ReleaseManifest],
    ) -> impl Iterator<Item = (&'a ReleaseManifest, &'a ReplicationTarget)> + 'a {
        manifests.iter().flat_map(move |m| {
            self.targets
                .iter()
                .filter(move |t| t.replicates(m.platform()))
                .map(move |t| (m, t))
        })
    }

    /// Whether every replica holds a verified copy of every artefact. Mutates nothing.
    pub async fn check(&self, manifests: &[ReleaseManifest]) -> Result<bool, RemoteError> {
        let mut all_ok = true;
        for (manifest, target) in self.pairs(manifests) {
            let key = artefact_key(manifest)?;
            match compare_replica(self.source.as_ref(), target.store.as_ref(), &key).await? {
                ReplicaStatus::Matching => debug!("{}: {key} verified", target.name),
                ReplicaStatus::Missing => {
                    warn!("{}: {key} is missing", target.name);
                    all_ok = false;
                }
                ReplicaStatus::Mismatch { source, target: found } => {
                    warn!(
                        "{}: {key} does not match origin (expected {}, found {})",
                        target.name,
                        describe(&source),
                        describe(&found)
                    );
                    all_ok = false;
                }
            }
        }
        Ok(all_ok)
    }

    /// Bring every replica in line with the origin for each manifest's artefact.
    pub async fn replicate(
        &self,
        manifests: &[ReleaseManifest],
    ) -> Result<ReplicationReport, RemoteError> {
        let mut report = ReplicationReport::default();
        for (manifest, target) in self.pairs(manifests) {
            let key = artefact_key(manifest)?;
            self.replicate_one(target, &key, &mut report).await?;
        }
        info!(
            "replication done: {} copied, {} repaired, {} already present",
            report.replicated, report.repaired, report.skipped
        );
        Ok(report)
    }

    async fn replicate_one(
        &self,
        target: &ReplicationTarget,
        key: &str,
        report: &mut ReplicationReport,
    ) -> Result<(), RemoteError> {
        let store = target.store.as_ref();
        let repairing = match compare_replica(self.source.as_ref(), store, key).await? {
            ReplicaStatus::Matching => {
                debug!("{}: {key} already replicated", target.name);
                report.skipped += 1;
                return Ok(());
            }
            ReplicaStatus::Missing => false,
            ReplicaStatus::Mismatch { source, target: found } => {
                warn!(
                    "{}: {key} differs from origin ({} vs {}), deleting",
                    target.name,
                    describe(&found),
                    describe(&source)
                );
                store.delete(key).await?;
                true
            }
        };

        info!("{}: replicating {key}", target.name);
        self.transfer(store, key).await?;

        match compare_replica(self.source.as_ref(), store, key).await? {
            ReplicaStatus::Matching => {}
            ReplicaStatus::Missing => {
                return Err(RemoteError::IntegrityFailure {
                    key: key.to_owned(),
                    expected: format!("object in {}", target.name),
                    actual: "no object".to_owned(),
                })
            }
            ReplicaStatus::Mismatch { source, target: found } => {
                return Err(RemoteError::IntegrityFailure {
                    key: key.to_owned(),
                    expected: describe(&source),
                    actual: describe(&found),
                })
            }
        }

        store.set_public_read(key).await?;
        if repairing {
            report.repaired += 1;
        } else {
            report.replicated += 1;
        }
        Ok(())
    }

    async fn transfer(&self, target: &dyn ObjectStore, key: &str) -> Result<(), RemoteError> {
        match self.stream_copy(target, key).await {
            Ok(()) => return Ok(()),
            Err(e) => warn!("streaming copy of {key} failed: {e}; falling back to staged copy"),
        }

        let expected = self
            .source
            .head(key)
            .await?
            .ok_or_else(|| StoreError::not_found(self.source.bucket(), key))?
            .size;
        let mut attempt = 1;
        loop {
            match self.staged_copy(target, key, expected).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.options.max_attempts => {
                    warn!(
                        "staged copy of {key} failed (attempt {attempt}/{}): {e}",
                        self.options.max_attempts
                    );
                    tokio::time::sleep(self.options.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn stream_copy(&self, target: &dyn ObjectStore, key: &str) -> Result<(), StoreError> {
        let body = self.source.get_stream(key).await?;
        target.put_stream(key, body, CONTENT_TYPE_OCTET_STREAM).await
    }

    /// Download into a local temporary file, check its size, upload from it.
    async fn staged_copy(
        &self,
        target: &dyn ObjectStore,
        key: &str,
        expected: u64,
    ) -> Result<(), StoreError> {
        let staged = match &self.options.staging_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let (file, path) = staged.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut body = self.source.get_stream(key).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        if written != expected {
            return Err(StoreError::Transient(format!(
                "incomplete download of {key}: {written} of {expected} bytes"
            )));
        }

        let upload = file_byte_stream(tokio::fs::File::open(&path).await?);
        target
            .put_stream(key, upload, CONTENT_TYPE_OCTET_STREAM)
            .await
    }
}
