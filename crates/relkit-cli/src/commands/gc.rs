use super::{json_pretty, settle, spinner, Globals, EXIT_SUCCESS};
use relkit_core::CoreError;
use relkit_remote::connect;
use relkit_store::GarbageCollector;

#[derive(Debug, Clone, Copy)]
pub enum Purge {
    Manifests,
    Sets,
}

pub async fn purge(
    globals: &Globals,
    what: Purge,
    prefix: Option<&str>,
    max_age_days: i64,
    dry_run: bool,
) -> Result<u8, CoreError> {
    if max_age_days < 0 {
        return Err(CoreError::Validation(format!(
            "--max-age-days must not be negative, got {max_age_days}"
        )));
    }
    let ctx = globals.context()?;
    let manifests = ctx.manifests.clone();
    let prefix = prefix.map_or_else(
        || match what {
            Purge::Manifests => format!("{}/", manifests.manifest_prefix()),
            Purge::Sets => format!("{}/", manifests.set_prefix()),
        },
        str::to_owned,
    );
    let blobs = manifests.object_store().clone();
    let gc = GarbageCollector::new(manifests, blobs).dry_run(dry_run);
    let max_age = chrono::Duration::days(max_age_days);
    let now = chrono::Utc::now();

    let pb = spinner(&format!("purging under {prefix}"), globals.json);
    let result = match what {
        Purge::Manifests => gc.purge_manifests(&prefix, max_age, now).await,
        Purge::Sets => gc.purge_manifest_sets(&prefix, max_age, now).await,
    };
    let report = settle(&pb, result.map_err(CoreError::from), "purge finished")?;

    if globals.json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "prefix": prefix,
            "examined": report.examined,
            "expired": report.expired,
            "deleted": report.deleted,
            "skipped_empty": report.skipped_empty,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let verb = if dry_run { "would remove" } else { "removed" };
        let removed = if dry_run {
            report.expired.len()
        } else {
            report.deleted
        };
        println!(
            "gc: {verb} {removed} of {} examined under {prefix}",
            report.examined
        );
        if dry_run {
            for key in &report.expired {
                println!("  {key}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

pub async fn orphans(globals: &Globals, prefix: &str, dry_run: bool) -> Result<u8, CoreError> {
    let ctx = globals.context()?;
    let origin = ctx.cfg.origin_buildresult_bucket()?;
    let blobs = connect(&origin.location)?;
    let gc = GarbageCollector::new(ctx.manifests.clone(), blobs).dry_run(dry_run);

    let pb = spinner(
        &format!("sweeping {}/{prefix}", origin.location.bucket_name),
        globals.json,
    );
    let report = settle(
        &pb,
        gc.sweep_orphans(prefix).await.map_err(CoreError::from),
        "sweep finished",
    )?;

    if globals.json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "prefix": prefix,
            "reachable": report.reachable,
            "listed": report.listed,
            "orphaned": report.orphaned,
            "deleted": report.deleted,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let verb = if dry_run { "would remove" } else { "removed" };
        let removed = if dry_run {
            report.orphaned.len()
        } else {
            report.deleted
        };
        println!(
            "gc: {verb} {removed} orphaned objects ({} listed, {} referenced)",
            report.listed, report.reachable
        );
        if dry_run {
            for key in &report.orphaned {
                println!("  {key}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
