use crate::CoreError;
use relkit_schema::CommitHash;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Full 40-character hash for `commit`.
///
/// A full hash is returned as is. Anything shorter is expanded with
/// `git rev-parse` in `repo_dir` (the working directory when `None`).
pub async fn expand_commit(commit: &str, repo_dir: Option<&Path>) -> Result<CommitHash, CoreError> {
    let commit = commit.trim();
    let candidate = CommitHash::new(commit.to_ascii_lowercase());
    if candidate.is_full() {
        return Ok(candidate);
    }
    if commit.is_empty() || !commit.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(format!(
            "'{commit}' is not a commit hash or prefix"
        )));
    }

    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{commit}^{{commit}}"));
    if let Some(dir) = repo_dir {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await.map_err(|e| {
        CoreError::Validation(format!("cannot expand commit '{commit}': git: {e}"))
    })?;
    if !output.status.success() {
        return Err(CoreError::Validation(format!(
            "commit '{commit}' could not be resolved to a full hash"
        )));
    }

    let full = CommitHash::new(String::from_utf8_lossy(&output.stdout).trim().to_owned());
    if !full.is_full() {
        return Err(CoreError::Validation(format!(
            "git returned '{full}' for commit '{commit}'"
        )));
    }
    debug!("expanded commit {commit} to {full}");
    Ok(full)
}
