use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::entry::EntryId;
use super::path::EntryPath;
use super::space::Frequency;
use super::tree::RowId;

/// One addressable node of a [`super::DataTree`].
///
/// Created during tree population; entries are attached lazily on first
/// access. A row's IDs and frequency never change after creation.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub(crate) id: RowId,
    pub(crate) frequency: Frequency,
    pub(crate) ids: Vec<String>,
    pub(crate) parent: Option<RowId>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) entries: BTreeMap<EntryPath, EntryId>,
    pub(crate) populated: bool,
}

impl DataRow {
    pub(crate) fn new(
        id: RowId,
        frequency: Frequency,
        ids: Vec<String>,
        parent: Option<RowId>,
    ) -> Self {
        Self {
            id,
            frequency,
            ids,
            parent,
            metadata: Map::new(),
            entries: BTreeMap::new(),
            populated: false,
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// IDs of every level from the root down to this row (empty for the root).
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Own ID at this row's level; `None` for the dataset root.
    pub fn label(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<RowId> {
        self.parent
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Registered entries keyed by logical path, primary and derivative alike.
    pub fn entries(&self) -> impl Iterator<Item = (&EntryPath, EntryId)> {
        self.entries.iter().map(|(p, id)| (p, *id))
    }

    pub fn entry(&self, path: &EntryPath) -> Option<EntryId> {
        self.entries.get(path).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }
}
