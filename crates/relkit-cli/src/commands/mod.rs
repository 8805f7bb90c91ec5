pub mod cleanup;
pub mod find;
pub mod gc;
pub mod publish;
pub mod replicate;

use indicatif::{ProgressBar, ProgressStyle};
use relkit_core::{CoreError, ReleaseRef, RunContext};
use relkit_schema::{
    CommandFeatureResolver, FeatureResolver, FeatureTable, FlavourSet, FlavourSets, MemoizingResolver, PublishingCfg,
    PublishingCfgs, PublishingVersions, SortedFeatureResolver, TableFeatureResolver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use relkit_core::{EXIT_FAILURE, EXIT_SUCCESS};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Globals {
    pub cfg: PathBuf,
    pub cfg_name: String,
    pub flavours: PathBuf,
    pub features: Option<PathBuf>,
    pub feature_command: Option<PathBuf>,
    pub feature_dir: PathBuf,
    pub json: bool,
}

impl Globals {
    pub fn publishing_cfg(&self) -> Result<PublishingCfg, CoreError> {
        let cfgs = PublishingCfgs::load(&self.cfg)?;
        Ok(cfgs.get(&self.cfg_name)?.clone())
    }

    pub fn flavour_set(&self, name: &str) -> Result<FlavourSet, CoreError> {
        let sets = FlavourSets::load(&self.flavours)?;
        Ok(sets.get(name)?.clone())
    }

    pub fn resolver(&self) -> Result<Arc<dyn FeatureResolver>, CoreError> {
        if let Some(program) = &self.feature_command {
            return Ok(Arc::new(MemoizingResolver::new(CommandFeatureResolver::new(
                program,
                &self.feature_dir,
            ))));
        }
        Ok(match &self.features {
            Some(path) => Arc::new(MemoizingResolver::new(TableFeatureResolver::new(
                FeatureTable::load(path)?,
            ))),
            None => Arc::new(MemoizingResolver::new(SortedFeatureResolver)),
        })
    }

    pub fn context(&self) -> Result<RunContext, CoreError> {
        RunContext::new(self.publishing_cfg()?, self.resolver()?)
    }
}

/// How a command names the release it works on.
#[derive(Debug, Clone)]
pub struct ReleaseSelector {
    pub version: Option<String>,
    pub commit: Option<String>,
    pub publishing_version: Option<String>,
    pub publishing_versions: PathBuf,
    pub repo: Option<PathBuf>,
}

impl ReleaseSelector {
    pub async fn resolve(&self) -> Result<ReleaseRef, CoreError> {
        let versions;
        let named = match &self.publishing_version {
            Some(name) => {
                versions = PublishingVersions::load(&self.publishing_versions)?;
                Some(versions.get(name)?)
            }
            None => None,
        };
        ReleaseRef::resolve(
            self.version.as_deref(),
            self.commit.as_deref(),
            named,
            self.repo.as_deref(),
        )
        .await
    }
}

pub async fn release_ref(
    version: &str,
    commit: &str,
    repo: Option<&Path>,
) -> Result<ReleaseRef, CoreError> {
    ReleaseRef::resolve(Some(version), Some(commit), None, repo).await
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CoreError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A spinner on stderr; hidden in JSON mode so stdout stays machine-readable.
pub fn spinner(msg: &str, json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Finish `pb` according to `result` and pass the result on.
pub fn settle<T>(pb: &ProgressBar, result: Result<T, CoreError>, ok: &str) -> Result<T, CoreError> {
    match &result {
        Ok(_) => spin_ok(pb, ok),
        Err(e) => spin_fail(pb, &e.to_string()),
    }
    result
}
