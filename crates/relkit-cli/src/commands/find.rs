use super::{json_pretty, release_ref, Globals, EXIT_FAILURE, EXIT_SUCCESS};
use relkit_core::CoreError;
use relkit_schema::{Architecture, ReleaseIdentifier, ReleaseManifest};
use std::path::Path;

pub enum Selection {
    Flavour {
        platform: String,
        arch: String,
        modifiers: Vec<String>,
    },
    FlavourSet(String),
}

pub async fn run(
    globals: &Globals,
    version: &str,
    commit: &str,
    repo: Option<&Path>,
    selection: Selection,
) -> Result<u8, CoreError> {
    let release = release_ref(version, commit, repo).await?;
    let epoch = release.epoch()?;
    let ctx = globals.context()?;

    let manifests: Vec<ReleaseManifest> = match selection {
        Selection::Flavour {
            platform,
            arch,
            modifiers,
        } => {
            let architecture: Architecture = arch.parse().map_err(CoreError::Validation)?;
            let id = ReleaseIdentifier {
                commit: release.commit.clone(),
                version: release.version.clone(),
                epoch,
                architecture,
                platform,
                modifiers,
            };
            ctx.manifests.get(&id).await?.into_iter().collect()
        }
        Selection::FlavourSet(name) => {
            let flavours = globals.flavour_set(&name)?;
            ctx.manifests
                .find_releases(&flavours, &release.commit, &release.version, epoch)
                .await?
        }
    };

    if globals.json {
        println!("{}", json_pretty(&manifests)?);
    } else if manifests.is_empty() {
        println!("no release manifests found");
    } else {
        for m in &manifests {
            let state = if m.published_image_metadata.is_some() {
                "published"
            } else {
                "unpublished"
            };
            println!(
                "{}  {}  {state}",
                m.s3_key.as_deref().unwrap_or("-"),
                m.identifier
            );
        }
    }
    Ok(if manifests.is_empty() {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}
