//! Jurisdictions (counties) partitioning population, features and labels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two real-world partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum County {
    Joco,
    Doco,
}

impl County {
    pub const ALL: [County; 2] = [County::Joco, County::Doco];

    pub fn as_str(&self) -> &'static str {
        match self {
            County::Joco => "joco",
            County::Doco => "doco",
        }
    }
}

impl fmt::Display for County {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for County {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "joco" => Ok(County::Joco),
            "doco" => Ok(County::Doco),
            other => Err(format!("unknown county '{}'", other)),
        }
    }
}

/// Scope of a run: a single county or both combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    Joco,
    Doco,
    #[default]
    Both,
}

impl Jurisdiction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Jurisdiction::Joco => "joco",
            Jurisdiction::Doco => "doco",
            Jurisdiction::Both => "both",
        }
    }

    /// Counties covered by this scope
    pub fn counties(&self) -> Vec<County> {
        match self {
            Jurisdiction::Joco => vec![County::Joco],
            Jurisdiction::Doco => vec![County::Doco],
            Jurisdiction::Both => County::ALL.to_vec(),
        }
    }

    pub fn includes(&self, county: County) -> bool {
        match self {
            Jurisdiction::Both => true,
            Jurisdiction::Joco => county == County::Joco,
            Jurisdiction::Doco => county == County::Doco,
        }
    }

    /// Whether data scoped to `scope` is relevant to this jurisdiction.
    /// Tables scoped to `both` are relevant everywhere.
    pub fn admits(&self, scope: Jurisdiction) -> bool {
        scope == Jurisdiction::Both || *self == Jurisdiction::Both || scope == *self
    }
}

impl From<County> for Jurisdiction {
    fn from(county: County) -> Self {
        match county {
            County::Joco => Jurisdiction::Joco,
            County::Doco => Jurisdiction::Doco,
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Jurisdiction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Jurisdiction::Both),
            other => other.parse::<County>().map(Jurisdiction::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jurisdiction_scope() {
        assert!(Jurisdiction::Both.includes(County::Doco));
        assert!(!Jurisdiction::Joco.includes(County::Doco));
        assert_eq!(Jurisdiction::Both.counties().len(), 2);

        assert!(Jurisdiction::Joco.admits(Jurisdiction::Both));
        assert!(Jurisdiction::Joco.admits(Jurisdiction::Joco));
        assert!(!Jurisdiction::Joco.admits(Jurisdiction::Doco));
    }

    #[test]
    fn test_parse_jurisdiction() {
        assert_eq!("both".parse::<Jurisdiction>().unwrap(), Jurisdiction::Both);
        assert_eq!("DOCO".parse::<Jurisdiction>().unwrap(), Jurisdiction::Doco);
        assert!("kansas".parse::<Jurisdiction>().is_err());
    }
}
