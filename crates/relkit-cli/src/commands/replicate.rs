use super::{json_pretty, settle, spinner, Globals, ReleaseSelector, EXIT_FAILURE, EXIT_SUCCESS};
use relkit_core::CoreError;

pub async fn run(
    globals: &Globals,
    flavour_set: &str,
    release: &ReleaseSelector,
    check_only: bool,
) -> Result<u8, CoreError> {
    let flavours = globals.flavour_set(flavour_set)?;
    let release = release.resolve().await?;
    let ctx = globals.context()?;

    let manifests = ctx
        .manifests
        .find_releases(&flavours, &release.commit, &release.version, release.epoch()?)
        .await?;
    if manifests.is_empty() {
        return Err(CoreError::NoReleases(format!(
            "no release manifests for {} at {} in flavour set '{flavour_set}'",
            release.version, release.commit
        )));
    }
    let replicas: Vec<&str> = ctx
        .replicator
        .targets()
        .iter()
        .map(|t| t.name.as_str())
        .collect();

    if check_only {
        let pb = spinner("verifying replicas", globals.json);
        let in_sync = settle(
            &pb,
            ctx.replicator.check(&manifests).await.map_err(CoreError::from),
            "replicas verified",
        )?;
        if globals.json {
            let payload = serde_json::json!({
                "manifests": manifests.len(),
                "replicas": replicas,
                "in_sync": in_sync,
            });
            println!("{}", json_pretty(&payload)?);
        } else if in_sync {
            println!("all {} artefacts present in {} replicas", manifests.len(), replicas.len());
        } else {
            println!("replicas are missing or differ from the origin (see log)");
        }
        return Ok(if in_sync { EXIT_SUCCESS } else { EXIT_FAILURE });
    }

    let pb = spinner(
        &format!("replicating {} artefacts", manifests.len()),
        globals.json,
    );
    let report = settle(
        &pb,
        ctx.replicator.replicate(&manifests).await.map_err(CoreError::from),
        "replicas in sync",
    )?;
    if globals.json {
        let payload = serde_json::json!({
            "manifests": manifests.len(),
            "replicas": replicas,
            "replicated": report.replicated,
            "repaired": report.repaired,
            "skipped": report.skipped,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "replicate: {} copied, {} repaired, {} already in sync",
            report.replicated, report.repaired, report.skipped
        );
    }
    Ok(EXIT_SUCCESS)
}
