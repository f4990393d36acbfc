//! Arena-backed dataset tree.
//!
//! The tree owns every row and entry in indexed collections; rows refer to
//! their parent and entries by index. Leaves are kept in insertion order,
//! which downstream ID inference depends on, so builders must add them in a
//! deterministic order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entry::{DataEntry, Datatype, EntryId};
use super::path::EntryPath;
use super::row::DataRow;
use super::space::{Frequency, Hierarchy};
use crate::error::{Result, StoreError};

/// Index of a row in its tree's row arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct DataTree {
    dataset_id: String,
    hierarchy: Hierarchy,
    rows: Vec<DataRow>,
    entries: Vec<DataEntry>,
    by_ids: HashMap<Vec<String>, RowId>,
    leaves: Vec<RowId>,
}

impl DataTree {
    pub fn new(dataset_id: impl Into<String>, hierarchy: Hierarchy) -> Self {
        let root = DataRow::new(RowId(0), Frequency::Dataset, Vec::new(), None);
        let mut by_ids = HashMap::new();
        by_ids.insert(Vec::new(), RowId(0));
        Self {
            dataset_id: dataset_id.into(),
            hierarchy,
            rows: vec![root],
            entries: Vec::new(),
            by_ids,
            leaves: Vec::new(),
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn root(&self) -> RowId {
        RowId(0)
    }

    /// Adds a leaf (and any missing ancestors) identified by one ID per hierarchy level.
    ///
    /// Adding an already-present leaf merges `metadata` into it and keeps its
    /// original position.
    pub fn add_leaf<S: AsRef<str>>(&mut self, ids: &[S], metadata: Map<String, Value>) -> Result<RowId> {
        if ids.len() != self.hierarchy.depth() {
            return Err(StoreError::InvalidHierarchy(format!(
                "leaf needs {} IDs ({:?}), got {}",
                self.hierarchy.depth(),
                self.hierarchy.levels(),
                ids.len()
            )));
        }
        if let Some(pos) = ids.iter().position(|id| id.as_ref().is_empty()) {
            return Err(StoreError::InvalidHierarchy(format!(
                "empty {} ID",
                self.hierarchy.levels()[pos]
            )));
        }

        let mut parent = self.root();
        let mut prefix = Vec::with_capacity(ids.len());
        let mut created_leaf = false;
        for (depth, id) in ids.iter().enumerate() {
            prefix.push(id.as_ref().to_string());
            parent = match self.by_ids.get(&prefix) {
                Some(existing) => *existing,
                None => {
                    let row_id = RowId(self.rows.len());
                    let frequency = self.hierarchy.levels()[depth];
                    self.rows
                        .push(DataRow::new(row_id, frequency, prefix.clone(), Some(parent)));
                    self.by_ids.insert(prefix.clone(), row_id);
                    created_leaf = depth + 1 == ids.len();
                    row_id
                }
            };
        }

        if created_leaf {
            self.leaves.push(parent);
        }
        self.rows[parent.0].metadata.extend(metadata);
        Ok(parent)
    }

    pub fn row(&self, id: RowId) -> &DataRow {
        &self.rows[id.0]
    }

    pub(crate) fn row_mut(&mut self, id: RowId) -> &mut DataRow {
        &mut self.rows[id.0]
    }

    /// Looks up a row by the IDs of every level from the root down.
    pub fn row_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Option<&DataRow> {
        let key: Vec<String> = ids.iter().map(|s| s.as_ref().to_string()).collect();
        self.by_ids.get(&key).map(|id| self.row(*id))
    }

    /// Rows of one frequency in creation order.
    pub fn rows(&self, frequency: Frequency) -> impl Iterator<Item = &DataRow> {
        self.rows.iter().filter(move |r| r.frequency == frequency)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Leaf rows in the order the builder added them.
    pub fn leaves(&self) -> impl Iterator<Item = &DataRow> {
        self.leaves.iter().map(|id| self.row(*id))
    }

    pub fn leaf_ids(&self) -> Vec<Vec<String>> {
        self.leaves().map(|r| r.ids.clone()).collect()
    }

    /// Ancestors of `row` from its parent up to the root.
    pub fn ancestors(&self, row: RowId) -> Vec<RowId> {
        let mut out = Vec::new();
        let mut cur = self.row(row).parent;
        while let Some(id) = cur {
            out.push(id);
            cur = self.row(id).parent;
        }
        out
    }

    /// ID of `row` at hierarchy level `level`, if the row sits at or below it.
    pub fn frequency_id(&self, row: RowId, level: Frequency) -> Option<&str> {
        let depth = self.hierarchy.depth_of(level)?;
        if depth == 0 {
            return Some(&self.dataset_id);
        }
        self.row(row).ids.get(depth - 1).map(String::as_str)
    }

    /// Registers an entry in `row`.
    ///
    /// A primary entry and a derivative entry with the same base path are
    /// distinct keys and coexist; registering the same key twice is an error.
    pub fn add_entry(
        &mut self,
        row: RowId,
        path: EntryPath,
        datatype: Datatype,
        uri: impl Into<String>,
    ) -> Result<EntryId> {
        if self.row(row).entries.contains_key(&path) {
            return Err(StoreError::DuplicateEntry(path.to_string()));
        }
        let id = EntryId(self.entries.len());
        self.entries.push(DataEntry {
            id,
            row,
            path: path.clone(),
            datatype,
            uri: uri.into(),
        });
        self.row_mut(row).entries.insert(path, id);
        Ok(id)
    }

    pub fn entry(&self, id: EntryId) -> &DataEntry {
        &self.entries[id.0]
    }

    /// Entry at `path` in `row`, if registered.
    pub fn find_entry(&self, row: RowId, path: &EntryPath) -> Option<&DataEntry> {
        self.row(row).entry(path).map(|id| self.entry(id))
    }

    pub fn row_entries(&self, row: RowId) -> impl Iterator<Item = &DataEntry> {
        self.row(row).entries().map(|(_, id)| self.entry(id))
    }
}
