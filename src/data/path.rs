//! Entry address scheme.
//!
//! Each row holds two kinds of entries: primary data shared by every analysis,
//! and derivative data written by a named analysis. Internally the kind is a
//! tagged [`Namespace`]; the delimited text form is only produced at the
//! serialization boundary:
//!
//! ```text
//! brain_mask                  primary
//! brain_mask@                 derivative, empty namespace
//! brain_mask@segmentation_v1  derivative of "segmentation_v1"
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Reserved separator between a base path and its derivative namespace.
pub const NAMESPACE_DELIMITER: char = '@';

/// Which namespace of a row an entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Primary,
    /// Output of the named analysis. The name may be empty.
    Derivative(String),
}

impl Namespace {
    pub fn derivative(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.contains(NAMESPACE_DELIMITER) {
            return Err(StoreError::invalid_path(
                name,
                "namespace contains the reserved delimiter",
            ));
        }
        Ok(Self::Derivative(name))
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Analysis name for derivative entries.
    pub fn analysis(&self) -> Option<&str> {
        match self {
            Self::Primary => None,
            Self::Derivative(name) => Some(name),
        }
    }
}

/// Logical path of an entry, unique within a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPath {
    base: String,
    namespace: Namespace,
}

impl EntryPath {
    pub fn primary(base: impl Into<String>) -> Result<Self> {
        let base = base.into();
        validate_base(&base)?;
        Ok(Self {
            base,
            namespace: Namespace::Primary,
        })
    }

    pub fn derivative(base: impl Into<String>, analysis: impl Into<String>) -> Result<Self> {
        let base = base.into();
        validate_base(&base)?;
        Ok(Self {
            base,
            namespace: Namespace::derivative(analysis)?,
        })
    }

    pub fn new(base: impl Into<String>, namespace: Namespace) -> Result<Self> {
        match namespace {
            Namespace::Primary => Self::primary(base),
            Namespace::Derivative(name) => Self::derivative(base, name),
        }
    }

    /// Splits the delimited text form into base path and namespace.
    pub fn parse(logical: &str) -> Result<Self> {
        match logical.split_once(NAMESPACE_DELIMITER) {
            None => Self::primary(logical),
            Some((base, ns)) => {
                if ns.contains(NAMESPACE_DELIMITER) {
                    return Err(StoreError::invalid_path(
                        logical,
                        "more than one namespace delimiter",
                    ));
                }
                Self::derivative(base, ns)
            }
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_derivative(&self) -> bool {
        !self.namespace.is_primary()
    }
}

/// Base paths are `/`-separated names without the delimiter or empty segments.
fn validate_base(base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(StoreError::invalid_path(base, "empty base path"));
    }
    if base.contains(NAMESPACE_DELIMITER) {
        return Err(StoreError::invalid_path(
            base,
            "base path contains the reserved delimiter",
        ));
    }
    if base
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StoreError::invalid_path(base, "empty or relative segment"));
    }
    if base.contains('\\') {
        return Err(StoreError::invalid_path(base, "backslash in base path"));
    }
    Ok(())
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Namespace::Primary => f.write_str(&self.base),
            Namespace::Derivative(ns) => write!(f, "{}{}{}", self.base, NAMESPACE_DELIMITER, ns),
        }
    }
}

impl FromStr for EntryPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EntryPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
