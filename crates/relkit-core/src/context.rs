use crate::descriptor::{DescriptorService, StoreDescriptorService};
use crate::publisher::PublisherRegistry;
use crate::CoreError;
use relkit_remote::{connect, Replicator};
use relkit_schema::{FeatureResolver, PublishingCfg, ReleaseManifest};
use relkit_store::{Concurrency, ManifestStore};
use std::sync::Arc;
use tracing::info;

/// Everything one run works with, built once from a publishing configuration.
pub struct RunContext {
    pub cfg: PublishingCfg,
    /// Index in the source manifest bucket; releases are looked up here.
    pub manifests: ManifestStore,
    /// Indexes updated manifests are written to. Falls back to the source
    /// bucket when the configuration names no target bucket.
    pub manifest_targets: Vec<ManifestStore>,
    pub publishers: PublisherRegistry,
    pub descriptor: Arc<dyn DescriptorService>,
    pub replicator: Replicator,
}

impl RunContext {
    /// Open every bucket `cfg` names.
    pub fn new(cfg: PublishingCfg, resolver: Arc<dyn FeatureResolver>) -> Result<Self, CoreError> {
        cfg.validate()?;
        let source = cfg.source_manifest_bucket()?;
        let manifests = ManifestStore::new(connect(&source.location)?, resolver);

        let mut manifest_targets = Vec::new();
        for bucket in cfg.target_manifest_buckets() {
            manifest_targets.push(manifests.with_store(connect(&bucket.location)?));
        }
        if manifest_targets.is_empty() {
            manifest_targets.push(manifests.clone());
        }

        let descriptor_store = match &cfg.ocm.location {
            Some(location) => connect(location)?,
            None => Arc::clone(manifests.object_store()),
        };

        Ok(Self {
            publishers: PublisherRegistry::from_cfg(&cfg),
            descriptor: Arc::new(StoreDescriptorService::new(descriptor_store)),
            replicator: Replicator::from_cfg(&cfg)?,
            manifests,
            manifest_targets,
            cfg,
        })
    }

    #[must_use]
    pub fn with_publishers(mut self, publishers: PublisherRegistry) -> Self {
        self.publishers = publishers;
        self
    }

    #[must_use]
    pub fn with_descriptor_service(mut self, descriptor: Arc<dyn DescriptorService>) -> Self {
        self.descriptor = descriptor;
        self
    }

    #[must_use]
    pub fn with_replicator(mut self, replicator: Replicator) -> Self {
        self.replicator = replicator;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.manifests = self.manifests.with_concurrency(concurrency);
        self.manifest_targets = self
            .manifest_targets
            .into_iter()
            .map(|m| m.with_concurrency(concurrency))
            .collect();
        self
    }

    /// Index cleanup reads published state from: the first target bucket.
    pub fn published_manifests(&self) -> &ManifestStore {
        self.manifest_targets.first().unwrap_or(&self.manifests)
    }

    /// Write `manifest` to every target manifest bucket, at the key it was
    /// read from (its canonical key if it was never stored).
    pub async fn persist(&self, manifest: &ReleaseManifest) -> Result<(), CoreError> {
        let key = match &manifest.s3_key {
            Some(key) => key.clone(),
            None => self.manifests.resolve_manifest_key(&manifest.identifier).await?,
        };
        for target in &self.manifest_targets {
            target.put(&key, manifest).await?;
            info!("updated release manifest at {}/{key}", target.bucket());
        }
        Ok(())
    }
}
