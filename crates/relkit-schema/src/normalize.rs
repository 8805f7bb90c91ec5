//! Flavour normalisation: modifier canonicalisation and canonical names.
//!
//! A flavour is a platform plus a set of modifiers. Two flavours that differ only
//! in modifier order, duplicates, or modifiers implied by other modifiers must map
//! to the same canonical name, otherwise the manifest keys derived from them drift.

use crate::identity::Architecture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("failed to read feature table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse feature table: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("unknown platform: '{0}'")]
    UnknownPlatform(String),
    #[error("unknown modifiers: {0:?}")]
    UnknownModifiers(Vec<String>),
    #[error("feature command '{program}' failed ({status}): {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Computes the minimal feature set of a flavour.
///
/// Implementations must be pure with respect to their inputs: the same
/// platform, modifiers, architecture and version always give the same answer.
pub trait FeatureResolver: Send + Sync {
    /// Minimal, sorted modifier list for the flavour. The platform is not included.
    fn canonical_features(
        &self,
        platform: &str,
        modifiers: &[String],
        architecture: Architecture,
        version: &str,
    ) -> Result<Vec<String>, FeatureError>;

    fn canonical_name(
        &self,
        platform: &str,
        modifiers: &[String],
        architecture: Architecture,
        version: &str,
    ) -> Result<String, FeatureError> {
        let features = self.canonical_features(platform, modifiers, architecture, version)?;
        Ok(compose_canonical_name(platform, &features, architecture))
    }
}

/// Trim, drop empties, sort, dedupe.
pub fn normalise_modifiers(modifiers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = modifiers
        .iter()
        .map(|m| m.trim().to_owned())
        .filter(|m| !m.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// `<platform>-<features joined by "_">-<arch>`, or `<platform>-<arch>` without features.
pub fn compose_canonical_name(
    platform: &str,
    features: &[String],
    architecture: Architecture,
) -> String {
    if features.is_empty() {
        format!("{platform}-{architecture}")
    } else {
        format!("{platform}-{}-{architecture}", features.join("_"))
    }
}

/// Resolver that only normalises modifier spelling; no feature knowledge.
#[derive(Debug, Default, Clone, Copy)]
pub struct SortedFeatureResolver;

impl FeatureResolver for SortedFeatureResolver {
    fn canonical_features(
        &self,
        platform: &str,
        modifiers: &[String],
        _architecture: Architecture,
        _version: &str,
    ) -> Result<Vec<String>, FeatureError> {
        Ok(normalise_modifiers(modifiers)
            .into_iter()
            .filter(|m| m != platform)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Platform,
    #[serde(alias = "element", alias = "flag")]
    Modifier,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureIncludes {
    #[serde(default)]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Option<FeatureIncludes>,
}

impl FeatureDescriptor {
    fn includes(&self) -> &[String] {
        self.features.as_ref().map_or(&[], |f| f.include.as_slice())
    }
}

/// Known features by name, as declared in `features.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureTable {
    pub features: BTreeMap<String, FeatureDescriptor>,
}

impl FeatureTable {
    pub fn from_yaml_str(input: &str) -> Result<Self, FeatureError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, FeatureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureDescriptor> {
        self.features.get(name)
    }

    pub fn is_platform(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|f| f.feature_type == FeatureType::Platform)
    }

    /// Every feature reachable from `name` through `include`, excluding `name` itself.
    pub fn transitive_includes(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .get(name)
            .map(|f| f.includes().iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if next == name || !seen.insert(next.to_owned()) {
                continue;
            }
            if let Some(desc) = self.get(next) {
                stack.extend(desc.includes().iter().map(String::as_str));
            }
        }
        seen
    }
}

/// Resolver backed by a feature table; drops modifiers already implied by others.
#[derive(Debug, Clone)]
pub struct TableFeatureResolver {
    table: FeatureTable,
}

impl TableFeatureResolver {
    pub fn new(table: FeatureTable) -> Self {
        Self { table }
    }
}

impl FeatureResolver for TableFeatureResolver {
    fn canonical_features(
        &self,
        platform: &str,
        modifiers: &[String],
        _architecture: Architecture,
        _version: &str,
    ) -> Result<Vec<String>, FeatureError> {
        if !self.table.is_platform(platform) {
            return Err(FeatureError::UnknownPlatform(platform.to_owned()));
        }

        let selected = normalise_modifiers(modifiers);
        let unknown: Vec<String> = selected
            .iter()
            .filter(|m| self.table.get(m).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(FeatureError::UnknownModifiers(unknown));
        }

        let mut implied = self.table.transitive_includes(platform);
        for m in &selected {
            implied.extend(self.table.transitive_includes(m));
        }

        Ok(selected
            .into_iter()
            .filter(|m| m != platform && !implied.contains(m))
            .collect())
    }
}

/// Resolver delegating to an external `parse_features`-style program.
///
/// The program is invoked as
/// `<program> --feature-dir <dir> --features <platform,mods> --arch <a> --version <v> features`
/// and must print a comma-separated feature list on stdout.
#[derive(Debug, Clone)]
pub struct CommandFeatureResolver {
    program: PathBuf,
    leading_args: Vec<OsString>,
    feature_dir: PathBuf,
}

impl CommandFeatureResolver {
    pub fn new(program: impl Into<PathBuf>, feature_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            feature_dir: feature_dir.into(),
        }
    }

    /// Run `script` through `interpreter` instead of executing it directly.
    pub fn interpreted(
        interpreter: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
        feature_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: interpreter.into(),
            leading_args: vec![script.into().into_os_string()],
            feature_dir: feature_dir.into(),
        }
    }
}

impl FeatureResolver for CommandFeatureResolver {
    fn canonical_features(
        &self,
        platform: &str,
        modifiers: &[String],
        architecture: Architecture,
        version: &str,
    ) -> Result<Vec<String>, FeatureError> {
        let mut all = normalise_modifiers(modifiers);
        all.insert(0, platform.to_owned());

        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("--feature-dir")
            .arg(&self.feature_dir)
            .arg("--features")
            .arg(all.join(","))
            .arg("--arch")
            .arg(architecture.as_str())
            .arg("--version")
            .arg(version)
            .arg("features")
            .output()?;

        if !output.status.success() {
            return Err(FeatureError::Command {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let features: Vec<String> = stdout
            .trim()
            .split(',')
            .map(str::to_owned)
            .collect();
        Ok(normalise_modifiers(&features)
            .into_iter()
            .filter(|f| f != platform)
            .collect())
    }
}

type CacheKey = (String, Vec<String>, Architecture, String);

/// Caches results of an inner resolver for the lifetime of one run.
pub struct MemoizingResolver<R> {
    inner: R,
    cache: Mutex<HashMap<CacheKey, Vec<String>>>,
}

impl<R: FeatureResolver> MemoizingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<R: FeatureResolver> FeatureResolver for MemoizingResolver<R> {
    fn canonical_features(
        &self,
        platform: &str,
        modifiers: &[String],
        architecture: Architecture,
        version: &str,
    ) -> Result<Vec<String>, FeatureError> {
        let key: CacheKey = (
            platform.to_owned(),
            normalise_modifiers(modifiers),
            architecture,
            version.to_owned(),
        );
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(hit.clone());
        }

        let features = self
            .inner
            .canonical_features(platform, modifiers, architecture, version)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, features.clone());
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mods(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    fn table() -> FeatureTable {
        FeatureTable::from_yaml_str(
            r"
aws:
  type: platform
  features:
    include: [cloud]
gcp:
  type: platform
  features:
    include: [cloud]
cloud:
  type: element
  features:
    include: [server]
server:
  type: element
_prod:
  type: flag
gardener:
  type: element
  features:
    include: [server]
",
        )
        .unwrap()
    }

    #[test]
    fn normalise_trims_sorts_and_dedupes() {
        let out = normalise_modifiers(&mods(&[" server", "_prod", "server", ""]));
        assert_eq!(out, mods(&["_prod", "server"]));
    }

    #[test]
    fn canonical_name_format() {
        assert_eq!(
            compose_canonical_name("aws", &mods(&["_prod", "gardener"]), Architecture::Amd64),
            "aws-_prod_gardener-amd64"
        );
        assert_eq!(
            compose_canonical_name("kvm", &[], Architecture::Arm64),
            "kvm-arm64"
        );
    }

    #[test]
    fn sorted_resolver_is_order_independent() {
        let r = SortedFeatureResolver;
        let a = r
            .canonical_name("aws", &mods(&["server", "_prod"]), Architecture::Amd64, "318.9")
            .unwrap();
        let b = r
            .canonical_name("aws", &mods(&["_prod", "server"]), Architecture::Amd64, "318.9")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "aws-_prod_server-amd64");
    }

    #[test]
    fn feature_types_element_and_flag_are_modifiers() {
        let t = table();
        assert_eq!(t.get("cloud").unwrap().feature_type, FeatureType::Modifier);
        assert_eq!(t.get("_prod").unwrap().feature_type, FeatureType::Modifier);
        assert!(t.is_platform("aws"));
    }

    #[test]
    fn transitive_includes_follow_chains() {
        let t = table();
        let inc = t.transitive_includes("aws");
        assert!(inc.contains("cloud"));
        assert!(inc.contains("server"));
        assert!(!inc.contains("aws"));
    }

    #[test]
    fn table_resolver_drops_implied_modifiers() {
        let r = TableFeatureResolver::new(table());
        let features = r
            .canonical_features(
                "aws",
                &mods(&["server", "gardener", "_prod"]),
                Architecture::Amd64,
                "318.9",
            )
            .unwrap();
        assert_eq!(features, mods(&["_prod", "gardener"]));
    }

    #[test]
    fn table_resolver_rejects_unknown_inputs() {
        let r = TableFeatureResolver::new(table());
        assert!(matches!(
            r.canonical_features("azure", &[], Architecture::Amd64, "1.0"),
            Err(FeatureError::UnknownPlatform(_))
        ));
        assert!(matches!(
            r.canonical_features("aws", &mods(&["nope"]), Architecture::Amd64, "1.0"),
            Err(FeatureError::UnknownModifiers(m)) if m == mods(&["nope"])
        ));
    }

    #[test]
    fn table_tolerates_include_cycles() {
        let t = FeatureTable::from_yaml_str(
            r"
a:
  type: element
  features:
    include: [b]
b:
  type: element
  features:
    include: [a]
",
        )
        .unwrap();
        let inc = t.transitive_includes("a");
        assert_eq!(inc.into_iter().collect::<Vec<_>>(), mods(&["b"]));
    }

    struct Counting(AtomicUsize);

    impl FeatureResolver for Counting {
        fn canonical_features(
            &self,
            _platform: &str,
            modifiers: &[String],
            _architecture: Architecture,
            _version: &str,
        ) -> Result<Vec<String>, FeatureError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(normalise_modifiers(modifiers))
        }
    }

    #[test]
    fn memoizing_resolver_calls_inner_once_per_flavour() {
        let r = MemoizingResolver::new(Counting(AtomicUsize::new(0)));
        for _ in 0..3 {
            r.canonical_name("aws", &mods(&["b", "a"]), Architecture::Amd64, "1.0")
                .unwrap();
            r.canonical_name("aws", &mods(&["a", "b"]), Architecture::Amd64, "1.0")
                .unwrap();
        }
        assert_eq!(r.inner.0.load(Ordering::SeqCst), 1);
        assert_eq!(r.cached_entries(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn command_resolver_parses_program_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("parse_features");
        std::fs::write(&script, "echo 'aws,server,_prod'\n").unwrap();

        let r = CommandFeatureResolver::interpreted("sh", &script, dir.path());
        let features = r
            .canonical_features("aws", &mods(&["server"]), Architecture::Amd64, "1.0")
            .unwrap();
        assert_eq!(features, mods(&["_prod", "server"]));
    }

    #[cfg(unix)]
    #[test]
    fn command_resolver_surfaces_failures() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("parse_features");
        std::fs::write(&script, "echo boom >&2\nexit 3\n").unwrap();

        let r = CommandFeatureResolver::interpreted("sh", &script, dir.path());
        let err = r
            .canonical_features("aws", &[], Architecture::Amd64, "1.0")
            .unwrap_err();
        assert!(matches!(err, FeatureError::Command { ref stderr, .. } if stderr == "boom"));
    }
}
