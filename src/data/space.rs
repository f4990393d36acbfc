//! Data space: the fixed set of row frequencies and the dataset hierarchy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Position of a row in the dataset tree, drawn from the clinical data space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// The dataset root.
    Dataset,
    /// Study group / arm.
    Group,
    /// A single participant.
    Subject,
    /// Longitudinal timepoint shared across subjects.
    Timepoint,
    /// One acquisition session of one subject.
    Session,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Dataset,
        Frequency::Group,
        Frequency::Subject,
        Frequency::Timepoint,
        Frequency::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Group => "group",
            Self::Subject => "subject",
            Self::Timepoint => "timepoint",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|freq| freq.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StoreError::InvalidHierarchy(format!("unknown frequency {s:?}")))
    }
}

/// Ordered levels of the tree below the dataset root; the last one is the leaf level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Frequency>", into = "Vec<Frequency>")]
pub struct Hierarchy(Vec<Frequency>);

impl Hierarchy {
    pub fn new(levels: Vec<Frequency>) -> Result<Self> {
        if levels.is_empty() {
            return Err(StoreError::InvalidHierarchy(
                "hierarchy must have at least one level".into(),
            ));
        }
        if levels.contains(&Frequency::Dataset) {
            return Err(StoreError::InvalidHierarchy(
                "the dataset level is implicit and cannot appear in a hierarchy".into(),
            ));
        }
        for (i, level) in levels.iter().enumerate() {
            if levels[..i].contains(level) {
                return Err(StoreError::InvalidHierarchy(format!(
                    "level {level} appears more than once"
                )));
            }
        }
        Ok(Self(levels))
    }

    /// Parses a list of level names, e.g. `["subject", "session"]`.
    pub fn parse<S: AsRef<str>>(levels: &[S]) -> Result<Self> {
        let levels = levels
            .iter()
            .map(|l| l.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Self::new(levels)
    }

    pub fn levels(&self) -> &[Frequency] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn leaf(&self) -> Frequency {
        // Non-empty by construction.
        self.0[self.0.len() - 1]
    }

    /// Depth of `freq` below the dataset root (dataset = 0), if it is addressable.
    pub fn depth_of(&self, freq: Frequency) -> Option<usize> {
        if freq == Frequency::Dataset {
            return Some(0);
        }
        self.0.iter().position(|l| *l == freq).map(|i| i + 1)
    }
}

impl TryFrom<Vec<Frequency>> for Hierarchy {
    type Error = StoreError;

    fn try_from(levels: Vec<Frequency>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<Hierarchy> for Vec<Frequency> {
    fn from(h: Hierarchy) -> Self {
        h.0
    }
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self(vec![Frequency::Subject, Frequency::Session])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_parse_and_display() {
        assert_eq!("session".parse::<Frequency>().unwrap(), Frequency::Session);
        assert_eq!(" Subject ".parse::<Frequency>().unwrap(), Frequency::Subject);
        assert!("visit".parse::<Frequency>().is_err());
        assert_eq!(Frequency::Timepoint.to_string(), "timepoint");
    }

    #[test]
    fn test_hierarchy_validation() {
        assert!(Hierarchy::new(vec![]).is_err());
        assert!(Hierarchy::new(vec![Frequency::Dataset, Frequency::Subject]).is_err());
        assert!(Hierarchy::new(vec![Frequency::Subject, Frequency::Subject]).is_err());
        let h = Hierarchy::parse(&["subject", "session"]).unwrap();
        assert_eq!(h.leaf(), Frequency::Session);
        assert_eq!(h.depth(), 2);
    }

    #[test]
    fn test_hierarchy_depths() {
        let h = Hierarchy::default();
        assert_eq!(h.depth_of(Frequency::Dataset), Some(0));
        assert_eq!(h.depth_of(Frequency::Subject), Some(1));
        assert_eq!(h.depth_of(Frequency::Session), Some(2));
        assert_eq!(h.depth_of(Frequency::Timepoint), None);
    }

    #[test]
    fn test_hierarchy_serde() {
        let h: Hierarchy = serde_json::from_str(r#"["group","subject"]"#).unwrap();
        assert_eq!(h.levels(), &[Frequency::Group, Frequency::Subject]);
        assert!(serde_json::from_str::<Hierarchy>("[]").is_err());
        assert_eq!(serde_json::to_string(&h).unwrap(), r#"["group","subject"]"#);
    }
}
