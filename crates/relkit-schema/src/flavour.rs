use crate::config::ConfigError;
use crate::identity::{Architecture, ReleaseIdentifier};
use crate::types::CommitHash;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One architecture + platform + modifier combination the build produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flavour {
    pub architecture: Architecture,
    pub platform: String,
    pub modifiers: Vec<String>,
}

impl Flavour {
    pub fn release_identifier(
        &self,
        commit: CommitHash,
        version: impl Into<String>,
        epoch: u32,
    ) -> ReleaseIdentifier {
        ReleaseIdentifier {
            commit,
            version: version.into(),
            epoch,
            architecture: self.architecture,
            platform: self.platform.clone(),
            modifiers: self.modifiers.clone(),
        }
    }
}

/// Declares flavours by cross product of its three lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavourCombination {
    pub architectures: Vec<Architecture>,
    pub platforms: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavourSet {
    pub name: String,
    pub flavour_combinations: Vec<FlavourCombination>,
}

impl FlavourSet {
    /// Expands every combination in declaration order: architecture, then platform, then modifiers.
    pub fn flavours(&self) -> Vec<Flavour> {
        let no_modifiers: &[String] = &[];
        let mut out = Vec::new();
        for comb in &self.flavour_combinations {
            let modifier_sets: Vec<&[String]> = if comb.modifiers.is_empty() {
                vec![no_modifiers]
            } else {
                comb.modifiers.iter().map(Vec::as_slice).collect()
            };
            for arch in &comb.architectures {
                for platform in &comb.platforms {
                    for mods in &modifier_sets {
                        out.push(Flavour {
                            architecture: *arch,
                            platform: platform.clone(),
                            modifiers: mods.to_vec(),
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavourSets {
    pub flavour_sets: Vec<FlavourSet>,
}

impl FlavourSets {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn get(&self, name: &str) -> Result<&FlavourSet, ConfigError> {
        self.flavour_sets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownFlavourSet(name.to_owned()))
    }
}

/// Suffix of the VM image artefact a platform consumes.
pub fn vm_image_suffix(platform: &str) -> Option<&'static str> {
    Some(match platform {
        "ali" => ".qcow2",
        "aws" | "kvm" => ".raw",
        "azure" => ".vhd",
        "gcp" => ".gcpimage.tar.gz",
        "metal" | "oci" => ".tar.xz",
        "openstack" | "openstackbaremetal" => ".vmdk",
        "vmware" => ".ova",
        _ => return None,
    })
}
