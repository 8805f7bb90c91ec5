use super::{json_pretty, settle, spinner, Globals, ReleaseSelector, EXIT_SUCCESS};
use relkit_core::{CoreError, MissingCfgPolicy, Phase, PublishOptions, PublishPipeline};

#[derive(Debug, Default)]
pub struct Flags {
    pub platforms: Vec<String>,
    pub force: bool,
    pub start_from: Option<Phase>,
    pub stop_after: Option<Phase>,
    pub fail_on_missing_cfg: bool,
    pub check_replicas_only: bool,
    pub print_component_descriptor: bool,
}

impl Flags {
    fn options(&self) -> PublishOptions {
        PublishOptions {
            platforms: (!self.platforms.is_empty()).then(|| self.platforms.clone()),
            force: self.force,
            start_from: self.start_from,
            stop_after: self.stop_after,
            missing_cfg: if self.fail_on_missing_cfg {
                MissingCfgPolicy::Fail
            } else {
                MissingCfgPolicy::Warn
            },
            check_replicas_only: self.check_replicas_only,
        }
    }
}

pub async fn run(
    globals: &Globals,
    flavour_set: &str,
    release: &ReleaseSelector,
    flags: Flags,
) -> Result<u8, CoreError> {
    if let (Some(start), Some(stop)) = (flags.start_from, flags.stop_after) {
        if stop < start {
            return Err(CoreError::Validation(format!(
                "--stop-after {stop} comes before --start-from {start}"
            )));
        }
    }
    let flavours = globals.flavour_set(flavour_set)?;
    let release = release.resolve().await?;
    let ctx = globals.context()?;

    let pb = spinner(
        &format!("publishing {} ({})", release.version, release.commit.short(relkit_schema::KEY_COMMIT_LEN)),
        globals.json,
    );
    let pipeline = PublishPipeline::new(&ctx, flags.options());
    let report = settle(
        &pb,
        pipeline.run(&release, &flavours).await,
        &format!("published {}", release.version),
    )?;

    if globals.json {
        let payload = serde_json::json!({
            "version": release.version,
            "commit": release.commit,
            "report": report,
            "component_descriptor": report.descriptor.as_ref().filter(|_| flags.print_component_descriptor),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let phases: Vec<String> = report.phases_run.iter().map(ToString::to_string).collect();
        println!("phases:            {}", phases.join(", "));
        println!("published:         {}", report.published.len());
        for name in &report.published {
            println!("  {name}");
        }
        println!("already published: {}", report.already_published.len());
        if !report.unconfigured.is_empty() {
            println!("not configured:    {}", report.unconfigured.len());
            for name in &report.unconfigured {
                println!("  {name}");
            }
        }
        if report.phases_run.contains(&Phase::PublishComponentDescriptor) {
            let state = if report.descriptor_uploaded {
                "uploaded"
            } else {
                "kept existing"
            };
            println!("component descriptor: {state}");
        }
        if flags.print_component_descriptor {
            if let Some(descriptor) = &report.descriptor {
                println!("{}", json_pretty(descriptor)?);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_platform_list_means_all() {
        let options = Flags::default().options();
        assert!(options.platforms.is_none());
        assert_eq!(options.missing_cfg, MissingCfgPolicy::Warn);
    }

    #[test]
    fn flags_map_onto_options() {
        let flags = Flags {
            platforms: vec!["aws".to_owned()],
            fail_on_missing_cfg: true,
            stop_after: Some(Phase::PublishImages),
            ..Flags::default()
        };
        let options = flags.options();
        assert_eq!(options.platforms, Some(vec!["aws".to_owned()]));
        assert_eq!(options.missing_cfg, MissingCfgPolicy::Fail);
        assert_eq!(options.stop_after, Some(Phase::PublishImages));
    }
}
