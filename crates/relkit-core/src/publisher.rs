//! Per-platform publishers.
//!
//! Cloud-specific upload and registration live outside relkit. A `Publisher`
//! is the seam: it takes a manifest and the platform's target settings and
//! returns the manifest with `published_image_metadata` filled in, or rolls a
//! published image back in `cleanup`. `ExecPublisher` drives an external
//! command per target.

use async_trait::async_trait;
use relkit_schema::{ManifestError, PublishingCfg, PublishingTarget, ReleaseManifest};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("target for platform '{platform}' has no {action} command")]
    NoCommand {
        platform: String,
        action: &'static str,
    },
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("'{program}' printed an unreadable manifest: {source}")]
    InvalidOutput {
        program: String,
        #[source]
        source: ManifestError,
    },
    #[error("serializing publish request failed: {0}")]
    Request(String),
    #[error("publishing {release} failed: {reason}")]
    Failed { release: String, reason: String },
}

/// Publishes and rolls back images for one platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> &str;

    /// Publish `manifest`'s image and return the manifest carrying the result.
    ///
    /// Implementations roll back their own partial provider state before
    /// returning an error.
    async fn publish(
        &self,
        manifest: &ReleaseManifest,
        target: &PublishingTarget,
    ) -> Result<ReleaseManifest, PublishError>;

    /// Remove the published image. On success outside dry-run the returned
    /// manifest has no `published_image_metadata`.
    async fn cleanup(
        &self,
        manifest: &ReleaseManifest,
        target: &PublishingTarget,
        dry_run: bool,
    ) -> Result<ReleaseManifest, PublishError>;
}

#[derive(Default, Clone)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An `ExecPublisher` for every target that names a publish command.
    pub fn from_cfg(cfg: &PublishingCfg) -> Self {
        let mut registry = Self::new();
        for target in &cfg.targets {
            if target.commands().publish_command.is_some() {
                registry.register(Arc::new(ExecPublisher::new(target.platform())));
            } else {
                debug!("no publish command for {}", target.platform());
            }
        }
        registry
    }

    /// Replaces any publisher already registered for the same platform.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers
            .insert(publisher.platform().to_owned(), publisher);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(platform).cloned()
    }

    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.publishers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Publish `manifest`; if that fails, give the publisher a chance to clean
/// up after itself, then return the publish error.
pub async fn publish_image(
    publisher: &dyn Publisher,
    manifest: &ReleaseManifest,
    target: &PublishingTarget,
) -> Result<ReleaseManifest, PublishError> {
    info!("publishing {}", manifest.identifier);
    match publisher.publish(manifest, target).await {
        Ok(published) => Ok(published),
        Err(e) => {
            error!("publishing {} failed: {e}", manifest.identifier);
            match publisher.cleanup(manifest, target, false).await {
                Ok(_) => info!("cleaned up after failed publish of {}", manifest.identifier),
                Err(PublishError::NoCommand { platform, .. }) => {
                    warn!("do not know how to clean up on {platform}");
                }
                Err(cleanup_err) => {
                    warn!(
                        "cleanup after failed publish of {} failed too: {cleanup_err}",
                        manifest.identifier
                    );
                }
            }
            Err(e)
        }
    }
}

/// Runs the target's `publish_command` / `cleanup_command`.
///
/// The manifest is written to the command's stdin as YAML and the updated
/// manifest is read back from its stdout. The command also sees
/// `RELKIT_PLATFORM`, `RELKIT_ACTION` (`publish` or `cleanup`),
/// `RELKIT_DRY_RUN` (`0` or `1`) and `RELKIT_TARGET_CFG` (the target settings
/// as JSON). A cleanup command may print nothing, in which case the published
/// image metadata is simply cleared.
pub struct ExecPublisher {
    platform: String,
}

impl ExecPublisher {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    async fn run(
        &self,
        argv: &[String],
        action: &'static str,
        manifest: &ReleaseManifest,
        target: &PublishingTarget,
        dry_run: bool,
    ) -> Result<Option<ReleaseManifest>, PublishError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(self.no_command(action));
        };
        let input = manifest
            .to_yaml_string()
            .map_err(|e| PublishError::Request(e.to_string()))?;
        let target_json =
            serde_json::to_string(target).map_err(|e| PublishError::Request(e.to_string()))?;

        debug!("running {action} command for {}: {argv:?}", self.platform);
        let spawn_err = |source: std::io::Error| PublishError::Spawn {
            program: program.clone(),
            source,
        };
        let mut child = Command::new(program)
            .args(args)
            .env("RELKIT_PLATFORM", &self.platform)
            .env("RELKIT_ACTION", action)
            .env("RELKIT_DRY_RUN", if dry_run { "1" } else { "0" })
            .env("RELKIT_TARGET_CFG", target_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that does not read the manifest closes the pipe early.
            match stdin.write_all(input.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(spawn_err(e)),
            }
        }
        let output = child.wait_with_output().await.map_err(spawn_err)?;

        if !output.status.success() {
            return Err(PublishError::Command {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let mut updated =
            ReleaseManifest::from_yaml_str(&stdout).map_err(|source| PublishError::InvalidOutput {
                program: program.clone(),
                source,
            })?;
        if updated.s3_key.is_none() {
            updated.s3_key.clone_from(&manifest.s3_key);
            updated.s3_bucket.clone_from(&manifest.s3_bucket);
        }
        Ok(Some(updated))
    }

    fn no_command(&self, action: &'static str) -> PublishError {
        PublishError::NoCommand {
            platform: self.platform.clone(),
            action,
        }
    }
}

#[async_trait]
impl Publisher for ExecPublisher {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(
        &self,
        manifest: &ReleaseManifest,
        target: &PublishingTarget,
    ) -> Result<ReleaseManifest, PublishError> {
        let argv = target
            .commands()
            .publish_command
            .as_deref()
            .ok_or_else(|| self.no_command("publish"))?;
        let updated = self
            .run(argv, "publish", manifest, target, false)
            .await?
            .ok_or_else(|| PublishError::Failed {
                release: manifest.identifier.to_string(),
                reason: "publish command printed no manifest".to_owned(),
            })?;
        if updated.published_image_metadata.is_none() {
            return Err(PublishError::Failed {
                release: manifest.identifier.to_string(),
                reason: "publish command returned no published image metadata".to_owned(),
            });
        }
        Ok(updated)
    }

    async fn cleanup(
        &self,
        manifest: &ReleaseManifest,
        target: &PublishingTarget,
        dry_run: bool,
    ) -> Result<ReleaseManifest, PublishError> {
        let argv = target
            .commands()
            .cleanup_command
            .as_deref()
            .ok_or_else(|| self.no_command("cleanup"))?;
        let updated = self.run(argv, "cleanup", manifest, target, dry_run).await?;
        if dry_run {
            return Ok(manifest.clone());
        }
        Ok(updated
            .unwrap_or_else(|| manifest.clone())
            .with_published_image_metadata(None))
    }
}
