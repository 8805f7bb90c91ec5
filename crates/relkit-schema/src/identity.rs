use crate::normalize::{FeatureError, FeatureResolver};
use crate::types::{CommitHash, ObjectKey};
use crate::version::{major_of, VersionError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix under which single release manifests are stored.
pub const MANIFEST_KEY_PREFIX: &str = "meta/singles";

/// Prefix under which manifest sets are stored.
pub const MANIFEST_SET_KEY_PREFIX: &str = "meta/sets";

/// Number of commit characters embedded in a manifest key.
///
/// Two commits sharing this prefix collide on the key; the manifest store
/// detects that after fetch by comparing identities, it does not prevent it.
pub const KEY_COMMIT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amd64" => Ok(Self::Amd64),
            "arm64" => Ok(Self::Arm64),
            other => Err(format!("unknown architecture '{other}', expected amd64 or arm64")),
        }
    }
}

/// Everything needed to name one release of one flavour unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseIdentifier {
    #[serde(rename = "build_committish")]
    pub commit: CommitHash,
    pub version: String,
    #[serde(rename = "gardenlinux_epoch", deserialize_with = "de_epoch")]
    pub epoch: u32,
    pub architecture: Architecture,
    pub platform: String,
    #[serde(default, deserialize_with = "de_modifiers")]
    pub modifiers: Vec<String>,
}

impl ReleaseIdentifier {
    /// The epoch must equal the version's major component when that is numeric.
    pub fn validate(&self) -> Result<(), VersionError> {
        if let Some(major) = major_of(&self.version) {
            if major != self.epoch {
                return Err(VersionError::EpochMismatch {
                    version: self.version.clone(),
                    epoch: self.epoch,
                });
            }
        }
        Ok(())
    }

    pub fn canonical_name(&self, resolver: &dyn FeatureResolver) -> Result<String, FeatureError> {
        resolver.canonical_name(
            &self.platform,
            &self.modifiers,
            self.architecture,
            &self.version,
        )
    }

    /// `<canonical-flavour-name>-<version>-<commit[:8]>`
    pub fn canonical_key_suffix(
        &self,
        resolver: &dyn FeatureResolver,
    ) -> Result<String, FeatureError> {
        let cname = self.canonical_name(resolver)?;
        Ok(format!(
            "{cname}-{}-{}",
            self.version,
            self.commit.short(KEY_COMMIT_LEN)
        ))
    }

    pub fn canonical_key(&self, resolver: &dyn FeatureResolver) -> Result<ObjectKey, FeatureError> {
        self.canonical_key_under(MANIFEST_KEY_PREFIX, resolver)
    }

    pub fn canonical_key_under(
        &self,
        prefix: &str,
        resolver: &dyn FeatureResolver,
    ) -> Result<ObjectKey, FeatureError> {
        Ok(ObjectKey::join(prefix, &self.canonical_key_suffix(resolver)?))
    }

    /// Copy with modifiers replaced by the resolver's minimal feature list.
    pub fn normalised(&self, resolver: &dyn FeatureResolver) -> Result<Self, FeatureError> {
        let modifiers = resolver.canonical_features(
            &self.platform,
            &self.modifiers,
            self.architecture,
            &self.version,
        )?;
        Ok(Self {
            modifiers,
            ..self.clone()
        })
    }
}

impl fmt::Display for ReleaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}[{}] {} ({})",
            self.platform,
            self.architecture,
            self.modifiers.join(","),
            self.version,
            self.commit
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(u32),
    Str(String),
}

fn de_epoch<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    match IntOrString::deserialize(d)? {
        IntOrString::Int(n) => Ok(n),
        IntOrString::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid epoch '{s}'"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

/// Older manifests store normalised modifiers as a single comma-separated string.
fn de_modifiers<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<ListOrCsv>::deserialize(d)? {
        None => Vec::new(),
        Some(ListOrCsv::List(v)) => v,
        Some(ListOrCsv::Csv(s)) => s
            .split(',')
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .collect(),
    })
}
