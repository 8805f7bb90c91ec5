use super::{json_pretty, release_ref, settle, spinner, Globals, EXIT_SUCCESS};
use relkit_core::{cleanup_releases, CoreError, RunContext};
use std::path::Path;
use tracing::info;

/// Commit of `version` as recorded in its stored component descriptor.
async fn descriptor_commit(ctx: &RunContext, version: &str) -> Result<String, CoreError> {
    let component = &ctx.cfg.ocm.component_name;
    let descriptor = ctx.descriptor.fetch(component, version).await?.ok_or_else(|| {
        CoreError::NoReleases(format!(
            "no component descriptor for {component} {version}; pass --commit"
        ))
    })?;
    let commit = descriptor.commit().ok_or_else(|| {
        CoreError::Validation(format!(
            "component descriptor for {component} {version} names no commit"
        ))
    })?;
    info!("using commit {commit} from the component descriptor");
    Ok(commit.to_string())
}

pub async fn run(
    globals: &Globals,
    flavour_set: &str,
    version: &str,
    commit: Option<&str>,
    repo: Option<&Path>,
    platforms: &[String],
    dry_run: bool,
) -> Result<u8, CoreError> {
    let flavours = globals.flavour_set(flavour_set)?;
    let ctx = globals.context()?;
    let commit = match commit {
        Some(c) => c.to_owned(),
        None => descriptor_commit(&ctx, version).await?,
    };
    let release = release_ref(version, &commit, repo).await?;

    let manifests = ctx
        .published_manifests()
        .find_releases(&flavours, &release.commit, &release.version, release.epoch()?)
        .await?;
    if manifests.is_empty() {
        return Err(CoreError::NoReleases(format!(
            "no release manifests for {} at {} in flavour set '{flavour_set}'",
            release.version, release.commit
        )));
    }

    let filter = (!platforms.is_empty()).then_some(platforms);
    let pb = spinner(
        &format!("cleaning up {} ({} manifests)", release.version, manifests.len()),
        globals.json,
    );
    let report = settle(
        &pb,
        cleanup_releases(&ctx, manifests, filter, dry_run).await,
        "cleanup finished",
    )?;

    if globals.json {
        println!("{}", json_pretty(&report)?);
    } else {
        let verb = if dry_run { "would clean up" } else { "cleaned up" };
        println!("cleanup: {verb} {} releases, skipped {}", report.cleaned.len(), report.skipped.len());
        for name in &report.cleaned {
            println!("  {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}
