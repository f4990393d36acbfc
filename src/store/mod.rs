//! Backend-independent synchronization core.
//!
//! This module mirrors a hierarchical dataset held by an arbitrary remote
//! backend into a local [`DataTree`], and moves entry contents between the
//! two.
//!
//! # Architecture
//!
//! - **backend**: the [`RemoteBackend`] contract each remote system implements
//! - **connection**: scoped sessions, released on every exit path
//! - **resolver**: maps rows onto remote containers
//! - **tree_builder**: discovers the remote hierarchy with deterministic leaf order
//! - **populate**: registers primary and derivative entries of a row
//! - **checksum**: digests and staleness comparison
//! - **transfer**: uploads, downloads and cache refreshes
//!
//! # Usage
//!
//! ```rust,ignore
//! use dataset_sync::backends::FileSystemBackend;
//! use dataset_sync::store::RemoteStore;
//!
//! let store = RemoteStore::new(FileSystemBackend::new("/srv/datasets"), "arcana");
//! let mut tree = store.populate_tree("proj")?;
//! let leaf = tree.leaves().next().map(|r| r.id()).unwrap();
//! store.populate_row(&mut tree, leaf)?;
//! for entry in tree.row_entries(leaf) {
//!     println!("{} -> {}", entry.path(), entry.uri());
//! }
//! ```

pub mod backend;
pub mod checksum;
pub mod connection;
pub mod populate;
pub mod resolver;
pub mod transfer;
pub mod tree_builder;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::data::{DataTree, Datatype, EntryId, EntryPath, FieldValue, Hierarchy, RowId};
use crate::error::{Result, StoreError};

pub use backend::{ContainerHandle, RemoteBackend, RemoteEntry};
pub use checksum::{ChecksumStatus, Checksums, DigestAlgorithm, calculate_checksums, compare_checksums};
pub use connection::Connection;
pub use transfer::{
    EntryTransferResult, SyncOutcome, TransferOutcome, TransferReport, UploadItem, UploadSource,
};
pub use tree_builder::LeafOrder;

/// A backend plus the dataset layout it is accessed with.
///
/// Every method is one operation group: it opens its own [`Connection`],
/// which is released before returning, on success and on error alike.
pub struct RemoteStore<B: RemoteBackend> {
    backend: B,
    group: String,
    hierarchy: Hierarchy,
    leaf_order: LeafOrder,
}

impl<B: RemoteBackend> RemoteStore<B> {
    /// Create a store over `backend` whose datasets live under `group`.
    pub fn new(backend: B, group: impl Into<String>) -> Self {
        Self {
            backend,
            group: group.into(),
            hierarchy: Hierarchy::default(),
            leaf_order: LeafOrder::default(),
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn with_leaf_order(mut self, leaf_order: LeafOrder) -> Self {
        self.leaf_order = leaf_order;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn connect(&self) -> Result<Connection<'_, B>> {
        Connection::open(&self.backend)
    }

    /// Builds the tree of `dataset_id` from the remote hierarchy.
    pub fn populate_tree(&self, dataset_id: &str) -> Result<DataTree> {
        let mut conn = self.connect()?;
        tree_builder::build_tree(
            &self.backend,
            &mut *conn,
            &self.group,
            dataset_id,
            &self.hierarchy,
            self.leaf_order,
        )
    }

    /// Registers every entry visible at `row`; see [`populate::populate_row`].
    pub fn populate_row(&self, tree: &mut DataTree, row: RowId) -> Result<usize> {
        let mut conn = self.connect()?;
        populate::populate_row(&self.backend, &mut *conn, &self.group, tree, row)
    }

    /// Creates the dataset container and one container per level of each leaf.
    ///
    /// Containers that already exist are reused, so repeating the call with
    /// the same leaves changes nothing. Writes close their session explicitly
    /// so a failed disconnect is reported instead of only logged.
    pub fn create_data_tree<S: AsRef<str>>(&self, dataset_id: &str, leaves: &[Vec<S>]) -> Result<()> {
        let mut conn = self.connect()?;
        let top = if self.group.is_empty() {
            None
        } else {
            Some(self.ensure_container(&mut *conn, None, "", &self.group)?)
        };
        let dataset_path = resolver::dataset_path(&self.group, dataset_id);
        let dataset = self.ensure_container(&mut *conn, top.as_ref(), &self.group, dataset_id)?;

        for ids in leaves {
            if ids.len() != self.hierarchy.depth() {
                return Err(StoreError::InvalidHierarchy(format!(
                    "leaf needs {} IDs, got {}",
                    self.hierarchy.depth(),
                    ids.len()
                )));
            }
            let mut parent = dataset.clone();
            let mut parent_path = dataset_path.clone();
            for id in ids {
                let id = id.as_ref();
                parent = self.ensure_container(&mut *conn, Some(&parent), &parent_path, id)?;
                parent_path = format!("{parent_path}/{id}");
            }
        }
        tracing::info!(dataset = %dataset_id, leaves = leaves.len(), "data tree created");
        conn.close()
    }

    /// Creates `label` under the container at `parent_path`, reusing an existing one.
    fn ensure_container(
        &self,
        session: &mut B::Session,
        parent: Option<&ContainerHandle>,
        parent_path: &str,
        label: &str,
    ) -> Result<ContainerHandle> {
        match self.backend.create_container(session, parent, label) {
            Ok(created) => Ok(created),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(parent = %parent_path, label, "container already present");
                let path = if parent_path.is_empty() {
                    label.to_string()
                } else {
                    format!("{parent_path}/{label}")
                };
                self.backend.lookup_container(session, &path)
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_entry(
        &self,
        tree: &mut DataTree,
        row: RowId,
        path: EntryPath,
        datatype: Datatype,
        inputs: &[String],
    ) -> Result<EntryId> {
        let mut conn = self.connect()?;
        transfer::create_entry(
            &self.backend,
            &mut *conn,
            &self.group,
            tree,
            row,
            path,
            datatype,
            inputs,
        )
    }

    pub fn put_fileset(&self, tree: &DataTree, entry: EntryId, local: &Path) -> Result<()> {
        let mut conn = self.connect()?;
        transfer::upload_fileset(&self.backend, &mut *conn, tree.entry(entry), local)?;
        conn.close()
    }

    pub fn put_value(&self, tree: &DataTree, entry: EntryId, value: &FieldValue) -> Result<()> {
        let mut conn = self.connect()?;
        transfer::upload_value(&self.backend, &mut *conn, tree.entry(entry), value)?;
        conn.close()
    }

    /// Downloads a file-set into an isolated directory under `staging_dir`.
    pub fn get_fileset(&self, tree: &DataTree, entry: EntryId, staging_dir: &Path) -> Result<PathBuf> {
        let mut conn = self.connect()?;
        transfer::download_fileset(&self.backend, &mut *conn, tree.entry(entry), staging_dir)
    }

    pub fn get_value(&self, tree: &DataTree, entry: EntryId) -> Result<FieldValue> {
        let mut conn = self.connect()?;
        transfer::download_value(&self.backend, &mut *conn, tree.entry(entry))
    }

    /// Refreshes `cache_dir` from the remote if its digests differ.
    pub fn sync_fileset(
        &self,
        tree: &DataTree,
        entry: EntryId,
        cache_dir: &Path,
        staging_dir: &Path,
    ) -> Result<SyncOutcome> {
        let mut conn = self.connect()?;
        transfer::sync_fileset(&self.backend, &mut *conn, tree.entry(entry), cache_dir, staging_dir)
    }

    /// Digests recorded by the backend for a file-set entry.
    pub fn remote_checksums(&self, tree: &DataTree, entry: EntryId) -> Result<Checksums> {
        let mut conn = self.connect()?;
        self.backend.remote_checksums(&mut *conn, tree.entry(entry).uri())
    }

    /// Digests of a local copy, using the backend's algorithm.
    pub fn calculate_checksums(&self, dir: &Path) -> Result<Checksums> {
        calculate_checksums(dir, self.backend.digest_algorithm(), &[])
    }

    pub fn upload_all(&self, tree: &mut DataTree, items: Vec<UploadItem>) -> Result<TransferReport> {
        let mut conn = self.connect()?;
        let report = transfer::upload_all(&self.backend, &mut *conn, &self.group, tree, items);
        conn.close()?;
        Ok(report)
    }

    pub fn get_provenance(&self, tree: &DataTree, entry: EntryId) -> Result<Option<Value>> {
        let mut conn = self.connect()?;
        self.backend.get_provenance(&mut *conn, tree.entry(entry).uri())
    }

    pub fn put_provenance(&self, tree: &DataTree, entry: EntryId, record: &Value) -> Result<()> {
        let mut conn = self.connect()?;
        self.backend.put_provenance(&mut *conn, tree.entry(entry).uri(), record)
    }

    pub fn save_dataset_definition(&self, dataset_id: &str, definition: &Value, name: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let path = resolver::dataset_path(&self.group, dataset_id);
        self.backend
            .save_dataset_definition(&mut *conn, &path, definition, name)
    }

    pub fn load_dataset_definition(&self, dataset_id: &str, name: &str) -> Result<Value> {
        let mut conn = self.connect()?;
        let path = resolver::dataset_path(&self.group, dataset_id);
        self.backend.load_dataset_definition(&mut *conn, &path, name)
    }
}
