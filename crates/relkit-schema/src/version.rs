//! Release versions, build epochs and build types.
//!
//! The epoch counts days since 2020-04-01, starting at 1. A numeric release
//! version is `<epoch>.<patch>`; the literals `today` and `dev` stand for the
//! first release candidate of the current epoch.

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const VERSION_TODAY: &str = "today";
pub const VERSION_DEV: &str = "dev";

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("failed to read version file: {0}")]
    Io(#[from] std::io::Error),
    #[error("no uncommented, non-empty line in version file")]
    EmptyVersionFile,
    #[error("version '{0}' not understood, expected <epoch>.<patch>, 'today' or 'dev'")]
    Malformed(String),
    #[error("date {0} lies before the first epoch")]
    BeforeInception(NaiveDate),
    #[error("epoch must be at least 1, got {0}")]
    InvalidEpoch(i64),
    #[error("version '{version}' does not match epoch {epoch}")]
    EpochMismatch { version: String, epoch: u32 },
}

fn epoch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 4, 1).unwrap_or(NaiveDate::MIN)
}

pub fn epoch_for(date: NaiveDate) -> Result<u32, VersionError> {
    let days = (date - epoch_start()).num_days() + 1;
    if days < 1 {
        return Err(VersionError::BeforeInception(date));
    }
    Ok(days as u32)
}

pub fn today_epoch() -> Result<u32, VersionError> {
    epoch_for(Utc::now().date_naive())
}

/// Snapshot repository date (`%Y%m%d`) belonging to an epoch.
pub fn snapshot_date(epoch: i64) -> Result<String, VersionError> {
    if epoch < 1 {
        return Err(VersionError::InvalidEpoch(epoch));
    }
    let date = epoch_start()
        .checked_add_days(Days::new((epoch - 1) as u64))
        .ok_or(VersionError::InvalidEpoch(epoch))?;
    Ok(date.format("%Y%m%d").to_string())
}

/// Major component of a numeric version, `None` for `today`/`dev` and friends.
pub fn major_of(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// First uncommented, non-empty line of a VERSION file, with trailing comments removed.
pub fn parse_version_file_str(content: &str) -> Result<String, VersionError> {
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split('#').next().unwrap_or(l).trim().to_owned())
        .ok_or(VersionError::EmptyVersionFile)
}

pub fn read_version_file(path: &Path) -> Result<String, VersionError> {
    parse_version_file_str(&std::fs::read_to_string(path)?)
}

/// Release version for a declared version string.
///
/// `today`/`dev` become `<epoch>.0`; anything else must be `<int>.<int>`.
pub fn resolve_version(declared: &str, epoch: u32) -> Result<String, VersionError> {
    if declared == VERSION_TODAY || declared == VERSION_DEV {
        return Ok(format!("{epoch}.0"));
    }
    match declared.split_once('.') {
        Some((major, patch)) if major.parse::<u32>().is_ok() && patch.parse::<u32>().is_ok() => {
            Ok(declared.to_owned())
        }
        _ => Err(VersionError::Malformed(declared.to_owned())),
    }
}

/// Epoch for a declared version string; `today`/`dev` use `current_epoch`.
pub fn epoch_from_version(declared: &str, current_epoch: u32) -> Result<u32, VersionError> {
    if let Some(major) = major_of(declared) {
        return Ok(major);
    }
    if declared == VERSION_TODAY || declared == VERSION_DEV {
        return Ok(current_epoch);
    }
    Err(VersionError::Malformed(declared.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Snapshot,
    Daily,
    Release,
}

impl BuildType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Daily => "daily",
            Self::Release => "release",
        }
    }

    /// Snapshot and daily sets are named after epoch and commit, releases after version.
    pub fn keys_by_commit(self) -> bool {
        matches!(self, Self::Snapshot | Self::Daily)
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(Self::Snapshot),
            "daily" => Ok(Self::Daily),
            "release" => Ok(Self::Release),
            other => Err(format!(
                "unknown build type '{other}', expected snapshot, daily or release"
            )),
        }
    }
}
