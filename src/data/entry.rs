use std::fmt;

use serde::{Deserialize, Serialize};

use super::path::EntryPath;
use super::tree::RowId;

/// Index of an entry in its tree's entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub(crate) usize);

/// Kind of data an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// One or more files fetched and stored as a unit.
    FileSet,
    /// A scalar or list-of-scalars value.
    Field,
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSet => f.write_str("file_set"),
            Self::Field => f.write_str("field"),
        }
    }
}

/// One independently fetchable/storable unit of data attached to a row.
///
/// The identity (`path`, `uri`) never changes once registered; uploads mutate
/// remote content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    pub(crate) id: EntryId,
    pub(crate) row: RowId,
    pub(crate) path: EntryPath,
    pub(crate) datatype: Datatype,
    pub(crate) uri: String,
}

impl DataEntry {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn row(&self) -> RowId {
        self.row
    }

    pub fn path(&self) -> &EntryPath {
        &self.path
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Backend-specific address; opaque to the core.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_derivative(&self) -> bool {
        self.path.is_derivative()
    }

    pub fn is_fileset(&self) -> bool {
        self.datatype == Datatype::FileSet
    }
}
