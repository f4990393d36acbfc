#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use dataset_sync::backends::FileSystemBackend;
use dataset_sync::data::{Datatype, EntryPath, FieldValue, Namespace};
use dataset_sync::store::{Checksums, ContainerHandle, DigestAlgorithm, RemoteBackend, RemoteEntry, RemoteStore};
use dataset_sync::{Result, StoreError};

/// In-memory backend that counts sessions and lists children in insertion
/// order, whatever their labels.
#[derive(Default)]
pub struct MockBackend {
    containers: RefCell<Vec<ContainerHandle>>,
    entries: RefCell<BTreeMap<String, Vec<RemoteEntry>>>,
    analyses: RefCell<BTreeMap<String, Vec<String>>>,
    fail_lookup: RefCell<Option<String>>,
    fail_disconnect: Cell<bool>,
    pub connects: Cell<usize>,
    pub disconnects: Cell<usize>,
}

pub struct MockSession;

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container at label path `path`; its ID is the path itself.
    pub fn add(&self, path: &str, timestamp: Option<DateTime<Utc>>) {
        let label = path.rsplit('/').next().unwrap_or(path);
        let mut handle = ContainerHandle::new(path, label);
        handle.timestamp = timestamp;
        self.containers.borrow_mut().push(handle);
    }

    pub fn add_entry(&self, container: &str, path: &str, datatype: Datatype) {
        let path = EntryPath::parse(path).unwrap();
        let uri = format!("{container}#{path}");
        self.entries
            .borrow_mut()
            .entry(container.to_string())
            .or_default()
            .push(RemoteEntry { path, datatype, uri });
    }

    pub fn add_analysis(&self, container: &str, name: &str) {
        self.analyses
            .borrow_mut()
            .entry(container.to_string())
            .or_default()
            .push(name.to_string());
    }

    /// Makes every lookup of `path` fail with `NotFound`.
    pub fn fail_lookup_of(&self, path: &str) {
        *self.fail_lookup.borrow_mut() = Some(path.to_string());
    }

    /// Makes every disconnect fail after releasing the session.
    pub fn fail_disconnects(&self) {
        self.fail_disconnect.set(true);
    }

    /// Labels of the children of `path`, in the order the backend lists them.
    pub fn listed_labels(&self, path: &str) -> Vec<String> {
        let mut session = MockSession;
        let parent = ContainerHandle::new(path, path);
        self.list_child_containers(&mut session, &parent)
            .unwrap()
            .into_iter()
            .map(|c| c.label)
            .collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.connects.get() - self.disconnects.get()
    }
}

impl RemoteBackend for MockBackend {
    type Session = MockSession;

    fn name(&self) -> &str {
        "mock"
    }

    fn digest_algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Sha256
    }

    fn connect(&self) -> Result<MockSession> {
        self.connects.set(self.connects.get() + 1);
        Ok(MockSession)
    }

    fn disconnect(&self, _session: MockSession) -> Result<()> {
        self.disconnects.set(self.disconnects.get() + 1);
        if self.fail_disconnect.get() {
            return Err(StoreError::ConnectionFailure("mock disconnect".into()));
        }
        Ok(())
    }

    fn lookup_container(&self, _s: &mut MockSession, path: &str) -> Result<ContainerHandle> {
        if self.fail_lookup.borrow().as_deref() == Some(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.containers
            .borrow()
            .iter()
            .find(|c| c.id == path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn list_child_containers(&self, _s: &mut MockSession, container: &ContainerHandle) -> Result<Vec<ContainerHandle>> {
        let prefix = format!("{}/", container.id);
        Ok(self
            .containers
            .borrow()
            .iter()
            .filter(|c| c.id.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .cloned()
            .collect())
    }

    fn create_container(
        &self,
        _s: &mut MockSession,
        parent: Option<&ContainerHandle>,
        label: &str,
    ) -> Result<ContainerHandle> {
        let id = match parent {
            Some(p) => format!("{}/{label}", p.id),
            None => label.to_string(),
        };
        if self.containers.borrow().iter().any(|c| c.id == id) {
            return Err(StoreError::AlreadyExists(id));
        }
        self.add(&id, None);
        Ok(ContainerHandle::new(id, label))
    }

    fn list_analyses(&self, _s: &mut MockSession, container: &ContainerHandle) -> Result<Vec<String>> {
        Ok(self.analyses.borrow().get(&container.id).cloned().unwrap_or_default())
    }

    fn create_analysis(
        &self,
        _s: &mut MockSession,
        parent: &ContainerHandle,
        name: &str,
        _inputs: &[String],
    ) -> Result<ContainerHandle> {
        self.add_analysis(&parent.id, name);
        Ok(ContainerHandle::new(format!("{}@{name}", parent.id), name))
    }

    fn lookup_analysis(&self, _s: &mut MockSession, parent: &ContainerHandle, name: &str) -> Result<ContainerHandle> {
        Ok(ContainerHandle::new(format!("{}@{name}", parent.id), name))
    }

    fn list_entries(
        &self,
        _s: &mut MockSession,
        container: &ContainerHandle,
        namespace: &Namespace,
    ) -> Result<Vec<RemoteEntry>> {
        Ok(self
            .entries
            .borrow()
            .get(&container.id)
            .map(|all| {
                all.iter()
                    .filter(|e| e.path.namespace() == namespace)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn entry_uri(&self, container: &ContainerHandle, path: &EntryPath, _datatype: Datatype) -> String {
        format!("{}#{path}", container.id)
    }

    fn upload_fileset(&self, _s: &mut MockSession, uri: &str, _local: &Path) -> Result<()> {
        Err(StoreError::UnsupportedOperation(format!("upload to {uri}")))
    }

    fn upload_analysis_output(&self, _s: &mut MockSession, uri: &str, _local: &Path) -> Result<()> {
        Err(StoreError::UnsupportedOperation(format!("upload to {uri}")))
    }

    fn upload_value(&self, _s: &mut MockSession, uri: &str, _value: &FieldValue) -> Result<()> {
        Err(StoreError::UnsupportedOperation(format!("upload to {uri}")))
    }

    fn download_fileset(&self, _s: &mut MockSession, uri: &str, _dest: &Path) -> Result<()> {
        Err(StoreError::NotFound(uri.to_string()))
    }

    fn download_value(&self, _s: &mut MockSession, uri: &str) -> Result<FieldValue> {
        Err(StoreError::NotFound(uri.to_string()))
    }

    fn remote_checksums(&self, _s: &mut MockSession, uri: &str) -> Result<Checksums> {
        Err(StoreError::NotFound(uri.to_string()))
    }

    fn get_provenance(&self, _s: &mut MockSession, _uri: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn put_provenance(&self, _s: &mut MockSession, uri: &str, _record: &Value) -> Result<()> {
        Err(StoreError::UnsupportedOperation(format!("provenance of {uri}")))
    }

    fn save_dataset_definition(&self, _s: &mut MockSession, dataset: &str, _definition: &Value, _name: &str) -> Result<()> {
        Err(StoreError::UnsupportedOperation(format!("definitions of {dataset}")))
    }

    fn load_dataset_definition(&self, _s: &mut MockSession, dataset: &str, name: &str) -> Result<Value> {
        Err(StoreError::NotFound(format!("{name} of {dataset}")))
    }
}

/// File-system store under a fresh temp dir, group `arcana`.
pub fn fs_store(tmp: &tempfile::TempDir) -> RemoteStore<FileSystemBackend> {
    RemoteStore::new(FileSystemBackend::new(tmp.path()), "arcana")
}

/// Writes `files` (relative path, contents) under `dir`.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}
