//! Manifest index on top of an object store.
//!
//! Single manifests live under `meta/singles/<canonical key suffix>`, manifest
//! sets under `meta/sets/<build type>/<set name>`. Manifest keys truncate the
//! commit to eight characters, so two releases can in principle share a key:
//! `get` re-derives the identity of whatever it fetched and refuses to return
//! a manifest that describes a different release. Collisions are detected
//! here, never prevented.

use crate::objects::{list_keys, ObjectStore, CONTENT_TYPE_YAML};
use crate::{Concurrency, StoreError};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use relkit_schema::{
    BucketName, BuildType, CommitHash, FeatureError, FeatureResolver, FlavourSet, ObjectKey, ReleaseIdentifier,
    ReleaseManifest, ReleaseManifestSet, MANIFEST_KEY_PREFIX, MANIFEST_SET_KEY_PREFIX,
};
use std::sync::Arc;
use tracing::{debug, warn};

const SET_COMMIT_LEN: usize = 6;

/// Name of a manifest set within its build-type directory.
///
/// Snapshot and daily sets are named `{epoch}-{commit[:6]}-{set}[-{timestamp}]`
/// and ignore `version`; release sets are named `{version}-{set}`.
pub fn manifest_set_name(
    flavour_set_name: &str,
    commit: &CommitHash,
    epoch: u32,
    version: &str,
    build_type: BuildType,
    timestamp: Option<&str>,
) -> String {
    if build_type.keys_by_commit() {
        let base = format!("{epoch}-{}-{flavour_set_name}", commit.short(SET_COMMIT_LEN));
        match timestamp {
            Some(ts) => format!("{base}-{ts}"),
            None => base,
        }
    } else {
        format!("{version}-{flavour_set_name}")
    }
}

#[derive(Clone)]
pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    resolver: Arc<dyn FeatureResolver>,
    concurrency: Concurrency,
    manifest_prefix: String,
    set_prefix: String,
}

impl ManifestStore {
    pub fn new(store: Arc<dyn ObjectStore>, resolver: Arc<dyn FeatureResolver>) -> Self {
        Self {
            store,
            resolver,
            concurrency: Concurrency::default(),
            manifest_prefix: MANIFEST_KEY_PREFIX.to_owned(),
            set_prefix: MANIFEST_SET_KEY_PREFIX.to_owned(),
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_prefixes(
        mut self,
        manifest_prefix: impl Into<String>,
        set_prefix: impl Into<String>,
    ) -> Self {
        self.manifest_prefix = manifest_prefix.into();
        self.set_prefix = set_prefix.into();
        self
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn bucket(&self) -> &BucketName {
        self.store.bucket()
    }

    pub fn resolver(&self) -> &dyn FeatureResolver {
        self.resolver.as_ref()
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn manifest_prefix(&self) -> &str {
        &self.manifest_prefix
    }

    pub fn set_prefix(&self) -> &str {
        &self.set_prefix
    }

    /// Same index, writing to and reading from another bucket.
    #[must_use]
    pub fn with_store(&self, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            ..self.clone()
        }
    }

    async fn fetch_text(&self, key: &str, absent_ok: bool) -> Result<Option<String>, StoreError> {
        match self.store.get(key).await {
            Ok(raw) => String::from_utf8(raw)
                .map(Some)
                .map_err(|e| StoreError::Manifest {
                    key: key.to_owned(),
                    source: e.into(),
                }),
            Err(e) if absent_ok && e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_manifest(&self, key: &str, text: &str) -> Result<ReleaseManifest, StoreError> {
        let manifest =
            ReleaseManifest::from_yaml_str(text).map_err(|source| StoreError::Manifest {
                key: key.to_owned(),
                source,
            })?;
        Ok(manifest.with_location(ObjectKey::new(key), self.bucket().clone()))
    }

    fn parse_set(&self, key: &str, text: &str) -> Result<ReleaseManifestSet, StoreError> {
        let set =
            ReleaseManifestSet::from_yaml_str(text).map_err(|source| StoreError::Manifest {
                key: key.to_owned(),
                source,
            })?;
        Ok(set.with_location(ObjectKey::new(key), self.bucket().clone()))
    }

    /// The manifest stored at `key`, tagged with its location.
    ///
    /// A document that fails to parse is an error even when `absent_ok` is set.
    pub async fn release_manifest(
        &self,
        key: &str,
        absent_ok: bool,
    ) -> Result<Option<ReleaseManifest>, StoreError> {
        match self.fetch_text(key, absent_ok).await? {
            Some(text) => self.parse_manifest(key, &text).map(Some),
            None => Ok(None),
        }
    }

    pub async fn release_manifest_set(
        &self,
        key: &str,
        absent_ok: bool,
    ) -> Result<Option<ReleaseManifestSet>, StoreError> {
        match self.fetch_text(key, absent_ok).await? {
            Some(text) => self.parse_set(key, &text).map(Some),
            None => Ok(None),
        }
    }

    /// Body of a listed key; `None` for keys deleted since listing and for
    /// empty placeholder objects.
    async fn fetch_listed(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.fetch_text(key, true).await? {
            Some(text) if text.trim().is_empty() => {
                debug!("skipping placeholder object {key}");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Canonical key of `id`. Runs the resolver on the calling thread.
    pub fn manifest_key(&self, id: &ReleaseIdentifier) -> Result<ObjectKey, StoreError> {
        Ok(id.canonical_key_under(&self.manifest_prefix, self.resolver())?)
    }

    /// Runs `f` against the resolver on the blocking pool. Resolvers may
    /// spawn processes and must not stall the async workers.
    async fn resolve<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FeatureResolver) -> Result<T, FeatureError> + Send + 'static,
    {
        let resolver = Arc::clone(&self.resolver);
        tokio::task::spawn_blocking(move || f(resolver.as_ref()))
            .await
            .map_err(|e| StoreError::Backend(format!("feature resolution task failed: {e}")))?
            .map_err(StoreError::from)
    }

    /// Canonical key of `id`, resolved off the async workers.
    pub async fn resolve_manifest_key(
        &self,
        id: &ReleaseIdentifier,
    ) -> Result<ObjectKey, StoreError> {
        let id = id.clone();
        let prefix = self.manifest_prefix.clone();
        self.resolve(move |r| id.canonical_key_under(&prefix, r)).await
    }

    /// The manifest for `id`, or `None` when absent or when the stored
    /// manifest turns out to describe another release.
    pub async fn get(&self, id: &ReleaseIdentifier) -> Result<Option<ReleaseManifest>, StoreError> {
        let key = self.resolve_manifest_key(id).await?;
        let Some(manifest) = self.release_manifest(&key, true).await? else {
            debug!("no manifest at {key}");
            return Ok(None);
        };

        let (wanted, stored) = (id.clone(), manifest.identifier.clone());
        let (expected, found) = self
            .resolve(move |r| Ok((wanted.normalised(r)?, stored.normalised(r)?)))
            .await?;
        if expected != found {
            warn!(
                key = %key,
                expected = %expected,
                found = %found,
                "manifest identity mismatch, ignoring stored manifest"
            );
            return Ok(None);
        }
        Ok(Some(manifest))
    }

    /// Write `manifest` at `key` without its store location.
    pub async fn put(&self, key: &str, manifest: &ReleaseManifest) -> Result<(), StoreError> {
        let yaml = manifest
            .stripped()
            .to_yaml_string()
            .map_err(|source| StoreError::Manifest {
                key: key.to_owned(),
                source,
            })?;
        self.store
            .put(key, yaml.into_bytes(), CONTENT_TYPE_YAML)
            .await
    }

    /// Write `manifest` at its canonical key and return that key.
    pub async fn upload(&self, manifest: &ReleaseManifest) -> Result<ObjectKey, StoreError> {
        let key = self.resolve_manifest_key(&manifest.identifier).await?;
        self.put(&key, manifest).await?;
        Ok(key)
    }

    pub async fn put_set(&self, key: &str, set: &ReleaseManifestSet) -> Result<(), StoreError> {
        let yaml = set
            .stripped()
            .to_yaml_string()
            .map_err(|source| StoreError::Manifest {
                key: key.to_owned(),
                source,
            })?;
        self.store
            .put(key, yaml.into_bytes(), CONTENT_TYPE_YAML)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    /// Every manifest under `prefix`, fetched with bounded concurrency.
    ///
    /// The stream re-lists on every call. Keys that vanish between listing and
    /// fetching are skipped, as are directory placeholders.
    pub fn enumerate<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxStream<'a, Result<ReleaseManifest, StoreError>> {
        list_keys(self.store.as_ref(), prefix)
            .try_filter(|key| future::ready(!key.is_directory_marker()))
            .map_ok(move |key| async move {
                match self.fetch_listed(&key).await? {
                    Some(text) => self.parse_manifest(&key, &text).map(Some),
                    None => Ok(None),
                }
            })
            .try_buffered(self.concurrency.manifests)
            .try_filter_map(|m| future::ready(Ok(m)))
            .boxed()
    }

    /// Every manifest set under `prefix`, fetched with bounded concurrency.
    pub fn enumerate_sets<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxStream<'a, Result<ReleaseManifestSet, StoreError>> {
        list_keys(self.store.as_ref(), prefix)
            .try_filter(|key| future::ready(!key.is_directory_marker()))
            .map_ok(move |key| async move {
                match self.fetch_listed(&key).await? {
                    Some(text) => self.parse_set(&key, &text).map(Some),
                    None => Ok(None),
                }
            })
            .try_buffered(self.concurrency.manifest_sets)
            .try_filter_map(|s| future::ready(Ok(s)))
            .boxed()
    }

    /// Manifests for every flavour of `flavour_set`, in declaration order.
    /// Flavours without a stored manifest are left out.
    pub async fn find_releases(
        &self,
        flavour_set: &FlavourSet,
        commit: &CommitHash,
        version: &str,
        epoch: u32,
    ) -> Result<Vec<ReleaseManifest>, StoreError> {
        let ids: Vec<ReleaseIdentifier> = flavour_set
            .flavours()
            .iter()
            .map(|f| f.release_identifier(commit.clone(), version, epoch))
            .collect();
        stream::iter(ids)
            .map(|id| async move { self.get(&id).await })
            .buffered(self.concurrency.manifests)
            .try_filter_map(|m| future::ready(Ok(m)))
            .try_collect()
            .await
    }

    pub fn set_key(
        &self,
        flavour_set_name: &str,
        id: &ReleaseIdentifier,
        build_type: BuildType,
        timestamp: Option<&str>,
    ) -> ObjectKey {
        let name = manifest_set_name(
            flavour_set_name,
            &id.commit,
            id.epoch,
            &id.version,
            build_type,
            timestamp,
        );
        ObjectKey::new(format!("{}/{build_type}/{name}", self.set_prefix))
    }

    pub async fn find_set(
        &self,
        flavour_set_name: &str,
        id: &ReleaseIdentifier,
        build_type: BuildType,
        timestamp: Option<&str>,
        absent_ok: bool,
    ) -> Result<Option<ReleaseManifestSet>, StoreError> {
        let key = self.set_key(flavour_set_name, id, build_type, timestamp);
        self.release_manifest_set(&key, absent_ok).await
    }
}
