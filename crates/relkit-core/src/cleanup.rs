use crate::context::RunContext;
use crate::CoreError;
use relkit_schema::ReleaseManifest;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Releases whose published images were removed (or would be).
    pub cleaned: Vec<String>,
    /// Releases left alone: filtered out, never published, or without a publisher.
    pub skipped: Vec<String>,
    #[serde(skip)]
    pub manifests: Vec<ReleaseManifest>,
}

/// Remove the published images of `manifests` and clear their publish state.
///
/// Only manifests that carry `published_image_metadata` and pass the
/// `platforms` filter are touched. Each cleaned manifest is written back to
/// every target manifest bucket right away; in dry-run mode publishers are
/// asked to only report and nothing is written.
pub async fn cleanup_releases(
    ctx: &RunContext,
    manifests: Vec<ReleaseManifest>,
    platforms: Option<&[String]>,
    dry_run: bool,
) -> Result<CleanupReport, CoreError> {
    let mut report = CleanupReport {
        dry_run,
        ..CleanupReport::default()
    };

    for manifest in manifests {
        let platform = manifest.platform().to_owned();
        let name = manifest.identifier.to_string();
        if platforms.is_some_and(|p| !p.iter().any(|x| *x == platform)) {
            info!("skipping {platform} (not in platform filter)");
            report.skipped.push(name);
            report.manifests.push(manifest);
            continue;
        }
        if manifest.published_image_metadata.is_none() {
            info!("{name} carries no published image metadata, skipping");
            report.skipped.push(name);
            report.manifests.push(manifest);
            continue;
        }

        let target = ctx.cfg.require_target(&platform)?;
        let Some(publisher) = ctx.publishers.get(&platform) else {
            warn!("do not know how to clean up on {platform}, skipping {name}");
            report.skipped.push(name);
            report.manifests.push(manifest);
            continue;
        };

        info!("cleaning up published images of {name}");
        let cleaned = publisher.cleanup(&manifest, target, dry_run).await?;
        if dry_run {
            for bucket in &ctx.manifest_targets {
                info!(
                    "dry run: would update release manifest at {}/{}",
                    bucket.bucket(),
                    manifest.s3_key.as_deref().unwrap_or("<canonical key>")
                );
            }
            report.cleaned.push(name);
            report.manifests.push(manifest);
            continue;
        }

        ctx.persist(&cleaned).await?;
        report.cleaned.push(name);
        report.manifests.push(cleaned);
    }
    Ok(report)
}
