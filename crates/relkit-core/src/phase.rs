use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of a publish run. Phases always run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    SyncImages,
    PublishImages,
    PublishComponentDescriptor,
}

impl Phase {
    pub const ALL: [Phase; 3] = [
        Phase::SyncImages,
        Phase::PublishImages,
        Phase::PublishComponentDescriptor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncImages => "sync-images",
            Self::PublishImages => "publish-images",
            Self::PublishComponentDescriptor => "publish-component-descriptor",
        }
    }

    /// Phases from `start` through `stop`, inclusive. `None` leaves that end open.
    pub fn range(start: Option<Phase>, stop: Option<Phase>) -> Vec<Phase> {
        Self::ALL
            .into_iter()
            .filter(|p| start.map_or(true, |s| *p >= s))
            .filter(|p| stop.map_or(true, |s| *p <= s))
            .collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown phase '{s}', expected one of: {}", names.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_kebab_names() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!(Phase::PublishImages.to_string(), "publish-images");
        assert!("publish".parse::<Phase>().is_err());
    }

    #[test]
    fn range_honours_both_ends() {
        assert_eq!(Phase::range(None, None), Phase::ALL.to_vec());
        assert_eq!(
            Phase::range(Some(Phase::PublishImages), None),
            vec![Phase::PublishImages, Phase::PublishComponentDescriptor]
        );
        assert_eq!(
            Phase::range(None, Some(Phase::SyncImages)),
            vec![Phase::SyncImages]
        );
        assert!(Phase::range(Some(Phase::PublishComponentDescriptor), Some(Phase::SyncImages))
            .is_empty());
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&Phase::PublishComponentDescriptor).unwrap();
        assert_eq!(json, "\"publish-component-descriptor\"");
    }
}
