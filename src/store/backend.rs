//! The contract every remote backend implements.
//!
//! The core never talks to a remote system directly: tree building, row
//! population and transfers are expressed in terms of [`RemoteBackend`].
//! Backend-specific behavior (creation idempotency, digest algorithm, URI
//! format) stays inside the implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checksum::{Checksums, DigestAlgorithm};
use crate::data::{Datatype, EntryPath, FieldValue, Namespace};
use crate::error::Result;

/// Remote container as seen by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Backend-assigned identifier, stable across reads.
    pub id: String,
    /// Human-readable label; intermediate levels are ordered by it.
    pub label: String,
    /// Acquisition time of leaf-level containers.
    pub timestamp: Option<DateTime<Utc>>,
    /// Subject age at acquisition, in seconds.
    pub age_seconds: Option<f64>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            timestamp: None,
            age_seconds: None,
        }
    }
}

/// An entry discovered in a remote container.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub path: EntryPath,
    pub datatype: Datatype,
    pub uri: String,
}

/// Primitive operations the core needs from a remote system.
///
/// Every method except [`RemoteBackend::connect`] takes the session returned
/// by `connect`; callers scope sessions with
/// [`super::connection::Connection`] so they are released on every exit path.
pub trait RemoteBackend {
    type Session;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Algorithm behind [`RemoteBackend::remote_checksums`]; local digests
    /// must be computed with the same one.
    fn digest_algorithm(&self) -> DigestAlgorithm;

    fn connect(&self) -> Result<Self::Session>;

    fn disconnect(&self, session: Self::Session) -> Result<()>;

    /// Looks up a container by its `/`-separated label path from the
    /// backend's top level. Fails with `NotFound` if absent.
    fn lookup_container(&self, session: &mut Self::Session, path: &str) -> Result<ContainerHandle>;

    /// Direct children of `container`, in no particular order.
    fn list_child_containers(
        &self,
        session: &mut Self::Session,
        container: &ContainerHandle,
    ) -> Result<Vec<ContainerHandle>>;

    /// Creates a container under `parent`, or at the top level when `None`.
    /// Fails with `AlreadyExists` when one with the same label is present, or
    /// `Conflict` when the label is taken by something that is not a container.
    fn create_container(
        &self,
        session: &mut Self::Session,
        parent: Option<&ContainerHandle>,
        label: &str,
    ) -> Result<ContainerHandle>;

    /// Names of the analyses recorded directly in `container`.
    fn list_analyses(&self, session: &mut Self::Session, container: &ContainerHandle) -> Result<Vec<String>>;

    /// Creates the analysis container `name` under `parent`, recording `inputs`
    /// (entry URIs) as provenance links. `AlreadyExists` if present.
    fn create_analysis(
        &self,
        session: &mut Self::Session,
        parent: &ContainerHandle,
        name: &str,
        inputs: &[String],
    ) -> Result<ContainerHandle>;

    /// Looks up an existing analysis container. `NotFound` if absent.
    fn lookup_analysis(
        &self,
        session: &mut Self::Session,
        parent: &ContainerHandle,
        name: &str,
    ) -> Result<ContainerHandle>;

    /// Entries stored in `container` under `namespace`. A namespace the
    /// container has no notion of yields an empty list.
    fn list_entries(
        &self,
        session: &mut Self::Session,
        container: &ContainerHandle,
        namespace: &Namespace,
    ) -> Result<Vec<RemoteEntry>>;

    /// Address of the entry `path` inside `container` (a row container for
    /// primary entries, an analysis container for derivatives).
    fn entry_uri(&self, container: &ContainerHandle, path: &EntryPath, datatype: Datatype) -> String;

    /// Uploads the contents of `local` as a primary file-set.
    fn upload_fileset(&self, session: &mut Self::Session, uri: &str, local: &Path) -> Result<()>;

    /// Uploads the contents of `local` as an output of the analysis owning `uri`.
    fn upload_analysis_output(&self, session: &mut Self::Session, uri: &str, local: &Path) -> Result<()>;

    fn upload_value(&self, session: &mut Self::Session, uri: &str, value: &FieldValue) -> Result<()>;

    /// Writes the files of the file-set at `uri` into `dest`, incrementally.
    fn download_fileset(&self, session: &mut Self::Session, uri: &str, dest: &Path) -> Result<()>;

    fn download_value(&self, session: &mut Self::Session, uri: &str) -> Result<FieldValue>;

    /// Digests the backend recorded for each file of the file-set at `uri`.
    fn remote_checksums(&self, session: &mut Self::Session, uri: &str) -> Result<Checksums>;

    fn get_provenance(&self, session: &mut Self::Session, uri: &str) -> Result<Option<Value>>;

    fn put_provenance(&self, session: &mut Self::Session, uri: &str, record: &Value) -> Result<()>;

    /// Stores a dataset definition document with the dataset container at
    /// label path `dataset`, under `name`.
    fn save_dataset_definition(
        &self,
        session: &mut Self::Session,
        dataset: &str,
        definition: &Value,
        name: &str,
    ) -> Result<()>;

    /// Loads a definition saved with [`RemoteBackend::save_dataset_definition`];
    /// `NotFound` if there is none under `name`.
    fn load_dataset_definition(
        &self,
        session: &mut Self::Session,
        dataset: &str,
        name: &str,
    ) -> Result<Value>;
}
