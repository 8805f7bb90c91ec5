//! The phased publish pipeline.
//!
//! A run walks `sync-images`, `publish-images` and
//! `publish-component-descriptor` in order over the manifests of one release.
//! Nothing but the manifests themselves records progress: a manifest that
//! already carries `published_image_metadata` is not published again, so a
//! failed run can simply be repeated.

use crate::commit::expand_commit;
use crate::context::RunContext;
use crate::descriptor::ComponentDescriptor;
use crate::phase::Phase;
use crate::publisher::publish_image;
use crate::CoreError;
use relkit_schema::version::major_of;
use relkit_schema::{
    already_published, CommitHash, FlavourSet, PublishingVersion, ReleaseManifest,
};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// What to do about a manifest whose platform has no publishing target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingCfgPolicy {
    /// Log and leave that platform unpublished.
    #[default]
    Warn,
    /// Abort before anything is published.
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Only publish to these platforms. Incompatible with the descriptor phase.
    pub platforms: Option<Vec<String>>,
    /// Publish even if a manifest is already published.
    pub force: bool,
    /// Skip every phase before this one.
    pub start_from: Option<Phase>,
    /// Stop once this phase is done.
    pub stop_after: Option<Phase>,
    pub missing_cfg: MissingCfgPolicy,
    /// Only verify replicas in `sync-images` instead of replicating.
    pub check_replicas_only: bool,
}

impl PublishOptions {
    fn selects(&self, platform: &str) -> bool {
        self.platforms
            .as_ref()
            .map_or(true, |p| p.iter().any(|x| x == platform))
    }
}

/// Version and full commit of the release a run works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRef {
    pub version: String,
    pub commit: CommitHash,
}

impl ReleaseRef {
    /// From either an explicit `version` and `commit`, or a named publishing
    /// version. Short commits are expanded in `repo_dir`.
    pub async fn resolve(
        version: Option<&str>,
        commit: Option<&str>,
        named: Option<&PublishingVersion>,
        repo_dir: Option<&Path>,
    ) -> Result<Self, CoreError> {
        let (version, commit) = match (version, commit, named) {
            (Some(v), Some(c), None) => (v.to_owned(), c.to_owned()),
            (None, None, Some(n)) => (n.version.clone(), n.commit.to_string()),
            _ => {
                return Err(CoreError::Validation(
                    "pass either a version and a commit, or a publishing version name".to_owned(),
                ))
            }
        };
        let commit = expand_commit(&commit, repo_dir).await?;
        Ok(Self { version, commit })
    }

    pub fn epoch(&self) -> Result<u32, CoreError> {
        major_of(&self.version).ok_or_else(|| {
            CoreError::Validation(format!(
                "version '{}' does not start with an epoch",
                self.version
            ))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub phases_run: Vec<Phase>,
    /// Releases published in this run.
    pub published: Vec<String>,
    /// Releases left alone because they were already published.
    pub already_published: Vec<String>,
    /// Releases without a publishing target, skipped under `MissingCfgPolicy::Warn`.
    pub unconfigured: Vec<String>,
    pub descriptor_uploaded: bool,
    /// Manifests as they stand at the end of the run.
    #[serde(skip)]
    pub manifests: Vec<ReleaseManifest>,
    #[serde(skip)]
    pub descriptor: Option<ComponentDescriptor>,
}

pub struct PublishPipeline<'a> {
    ctx: &'a RunContext,
    options: PublishOptions,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(ctx: &'a RunContext, options: PublishOptions) -> Self {
        Self { ctx, options }
    }

    /// Look up every flavour of `flavour_set` for `release` and run the phases.
    pub async fn run(
        &self,
        release: &ReleaseRef,
        flavour_set: &FlavourSet,
    ) -> Result<PipelineReport, CoreError> {
        let epoch = release.epoch()?;
        let manifests = self
            .ctx
            .manifests
            .find_releases(flavour_set, &release.commit, &release.version, epoch)
            .await?;
        if manifests.is_empty() {
            return Err(CoreError::NoReleases(format!(
                "no release manifests for {} at {} in flavour set '{}' \
                 (hint: `relkit find` lists what is stored)",
                release.version, release.commit, flavour_set.name
            )));
        }
        info!(
            "publishing {} at {} ({} manifests of '{}')",
            release.version,
            release.commit,
            manifests.len(),
            flavour_set.name
        );
        self.run_manifests(release, manifests).await
    }

    /// Run the selected phases over `manifests`.
    pub async fn run_manifests(
        &self,
        release: &ReleaseRef,
        mut manifests: Vec<ReleaseManifest>,
    ) -> Result<PipelineReport, CoreError> {
        let mut report = PipelineReport::default();
        let phases = Phase::range(self.options.start_from, self.options.stop_after);
        info!(
            "phases to run: {}",
            phases
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        for phase in phases {
            info!("starting phase {phase}");
            match phase {
                Phase::SyncImages => self.sync_images(&manifests).await?,
                Phase::PublishImages => self.publish_images(&mut manifests, &mut report).await?,
                Phase::PublishComponentDescriptor => {
                    self.publish_descriptor(release, &manifests, &mut report)
                        .await?;
                }
            }
            report.phases_run.push(phase);
            info!("finished phase {phase}");
        }
        if let Some(stop) = self.options.stop_after {
            info!("stopped after {stop} as requested");
        }

        report.manifests = manifests;
        Ok(report)
    }

    async fn sync_images(&self, manifests: &[ReleaseManifest]) -> Result<(), CoreError> {
        if self.options.check_replicas_only {
            if self.ctx.replicator.check(manifests).await? {
                return Ok(());
            }
            return Err(CoreError::ReplicasNotReady(
                "some replicas are missing or differ from the origin \
                 (hint: run `relkit replicate` first)"
                    .to_owned(),
            ));
        }
        let report = self.ctx.replicator.replicate(manifests).await?;
        info!(
            "replicas in sync: {} copied, {} repaired, {} verified",
            report.replicated, report.repaired, report.skipped
        );
        Ok(())
    }

    /// Every manifest's target is checked before the first publish.
    fn validate_targets(
        &self,
        manifests: &[ReleaseManifest],
        report: &mut PipelineReport,
    ) -> Result<Vec<bool>, CoreError> {
        let mut configured = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let platform = manifest.platform();
            let missing = if self.ctx.cfg.target(platform).is_none() {
                Some("no publishing target")
            } else if self.ctx.publishers.get(platform).is_none() {
                Some("no publisher")
            } else {
                None
            };
            match (missing, self.options.missing_cfg) {
                (None, _) => configured.push(true),
                (Some(what), MissingCfgPolicy::Warn) => {
                    warn!(
                        "{what} for platform '{platform}', {} will NOT be published",
                        manifest.identifier
                    );
                    report.unconfigured.push(manifest.identifier.to_string());
                    configured.push(false);
                }
                (Some(what), MissingCfgPolicy::Fail) => {
                    return Err(CoreError::MissingConfiguration(format!(
                        "{what} for platform '{platform}'"
                    )));
                }
            }
        }
        Ok(configured)
    }

    async fn publish_images(
        &self,
        manifests: &mut [ReleaseManifest],
        report: &mut PipelineReport,
    ) -> Result<(), CoreError> {
        let configured = self.validate_targets(manifests, report)?;

        for (manifest, configured) in manifests.iter_mut().zip(configured) {
            let platform = manifest.platform().to_owned();
            if !self.options.selects(&platform) {
                info!("skipping {platform} (not in platform filter)");
                continue;
            }
            if !configured {
                continue;
            }
            if already_published(manifest, &platform) {
                if !self.options.force {
                    info!("{} is already published, skipping", manifest.identifier);
                    report.already_published.push(manifest.identifier.to_string());
                    continue;
                }
                warn!("force-publishing {}", manifest.identifier);
            }

            let (Some(target), Some(publisher)) = (
                self.ctx.cfg.target(&platform),
                self.ctx.publishers.get(&platform),
            ) else {
                continue;
            };
            let published = publish_image(publisher.as_ref(), manifest, target).await?;
            self.ctx.persist(&published).await?;
            info!("publishing to {platform} succeeded");
            report.published.push(published.identifier.to_string());
            *manifest = published;
        }
        Ok(())
    }

    async fn publish_descriptor(
        &self,
        release: &ReleaseRef,
        manifests: &[ReleaseManifest],
        report: &mut PipelineReport,
    ) -> Result<(), CoreError> {
        if self.options.platforms.is_some() {
            return Err(CoreError::Validation(
                "a component descriptor must describe the full release set; \
                 it cannot be published with a platform filter"
                    .to_owned(),
            ));
        }
        let ocm = &self.ctx.cfg.ocm;
        let descriptor = self
            .ctx
            .descriptor
            .build(&release.version, &release.commit, ocm, manifests)?;
        info!(
            "publishing component descriptor {} {} (overwrite: {})",
            descriptor.component.name,
            descriptor.component.version,
            ocm.overwrite_component_descriptor
        );
        report.descriptor_uploaded = self
            .ctx
            .descriptor
            .upload(&descriptor, ocm.overwrite_component_descriptor)
            .await?;
        report.descriptor = Some(descriptor);
        Ok(())
    }
}
