//! Backend over a plain directory tree.
//!
//! The directory acts as the remote repository; container IDs and entry URIs
//! are `/`-separated paths relative to it:
//!
//! ```text
//! <root>/<top>/                      top-level container (e.g. a group)
//!     .container.json                label, timestamp, age
//!     containers/<label>/            child containers, same layout
//!     files/<base>/.content/         primary file-set content
//!     files/<base>/.checksums.json   its digest record
//!     fields/<base>.json             primary field value
//!     analyses/@<name>/              analysis container
//!         .analysis.json             inputs and outputs
//!         files/…  fields/…          derivative entries
//!     definitions/<name>.json        dataset definitions
//! <root>/.provenance/<uri>.json      provenance records
//! ```
//!
//! Digests are recorded at upload time in each file-set's `.checksums.json`.
//! Content sits in its own `.content` directory, so nested base paths such
//! as `anat` and `anat/t1w` never share files. Names starting with `.` are
//! reserved for this bookkeeping and rejected in base paths.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::data::{Datatype, EntryPath, FieldValue, NAMESPACE_DELIMITER, Namespace};
use crate::error::{Result, StoreError};
use crate::store::backend::{ContainerHandle, RemoteBackend, RemoteEntry};
use crate::store::checksum::{Checksums, DigestAlgorithm, calculate_checksums};

const CONTAINER_META: &str = ".container.json";
const ANALYSIS_META: &str = ".analysis.json";
/// Digest record written next to every stored file-set.
pub const CHECKSUM_MANIFEST: &str = ".checksums.json";
/// Holds the files of one stored file-set.
const CONTENT_DIR: &str = ".content";
const CHILDREN_DIR: &str = "containers";
const FILES_DIR: &str = "files";
const FIELDS_DIR: &str = "fields";
const ANALYSES_DIR: &str = "analyses";
const DEFINITIONS_DIR: &str = "definitions";
const PROVENANCE_DIR: &str = ".provenance";

/// Chunk size for incremental copies.
const COPY_CHUNK: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerMeta {
    label: String,
    created: DateTime<Utc>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    age_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnalysisMeta {
    name: String,
    created: DateTime<Utc>,
    /// URIs of the entries the analysis consumed.
    #[serde(default)]
    inputs: Vec<String>,
    /// Base paths of the entries it produced.
    #[serde(default)]
    outputs: Vec<String>,
}

/// Open session on a [`FileSystemBackend`].
#[derive(Debug, Default)]
pub struct FsSession {
    operations: u64,
}

impl FsSession {
    pub fn operations(&self) -> u64 {
        self.operations
    }

    fn tick(&mut self) {
        self.operations += 1;
    }
}

/// File-set repository stored in a local (or mounted) directory.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
    digest: DigestAlgorithm,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            digest: DigestAlgorithm::default(),
        }
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sets acquisition time and subject age on the container at label path `path`.
    pub fn set_acquisition(
        &self,
        path: &str,
        timestamp: Option<DateTime<Utc>>,
        age_seconds: Option<f64>,
    ) -> Result<()> {
        let dir = self.container_dir(path)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let mut meta = self.read_container_meta(&dir)?;
        meta.timestamp = timestamp;
        meta.age_seconds = age_seconds;
        write_json(&dir.join(CONTAINER_META), &meta)
    }

    /// Directory of the container at label path `path`.
    fn container_dir(&self, path: &str) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for (i, label) in path.split('/').enumerate() {
            validate_label(label)?;
            if i > 0 {
                dir.push(CHILDREN_DIR);
            }
            dir.push(label);
        }
        Ok(dir)
    }

    /// Resolves a container ID or entry URI, refusing anything outside the root.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel.is_empty()
            || !rel_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::invalid_path(rel, "not a path inside the repository"));
        }
        Ok(self.root.join(rel_path))
    }

    fn relative(&self, dir: &Path) -> Result<String> {
        let rel = dir
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::invalid_path(dir.display().to_string(), "outside repository"))?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn read_container_meta(&self, dir: &Path) -> Result<ContainerMeta> {
        let meta_path = dir.join(CONTAINER_META);
        if meta_path.is_file() {
            return read_json(&meta_path);
        }
        let label = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ContainerMeta {
            label,
            created: Utc::now(),
            timestamp: None,
            age_seconds: None,
        })
    }

    fn handle_for(&self, dir: &Path) -> Result<ContainerHandle> {
        let meta = self.read_container_meta(dir)?;
        Ok(ContainerHandle {
            id: self.relative(dir)?,
            label: meta.label,
            timestamp: meta.timestamp,
            age_seconds: meta.age_seconds,
        })
    }

    /// Directory of the analysis owning a derivative URI, if it is one.
    fn analysis_dir_of(&self, uri: &str) -> Result<Option<PathBuf>> {
        let marker = format!("/{ANALYSES_DIR}/{NAMESPACE_DELIMITER}");
        let Some(start) = uri.rfind(&marker) else {
            return Ok(None);
        };
        let name_start = start + marker.len();
        let end = uri[name_start..]
            .find('/')
            .map(|i| name_start + i)
            .unwrap_or(uri.len());
        self.resolve(&uri[..end]).map(Some)
    }

    fn record_output(&self, uri: &str) -> Result<()> {
        let Some(analysis_dir) = self.analysis_dir_of(uri)? else {
            return Ok(());
        };
        let meta_path = analysis_dir.join(ANALYSIS_META);
        let mut meta: AnalysisMeta = read_json(&meta_path)?;
        let rel = self.relative(&analysis_dir)?;
        let output = uri
            .strip_prefix(&rel)
            .map(|s| s.trim_start_matches('/'))
            .unwrap_or(uri)
            .to_string();
        if !meta.outputs.contains(&output) {
            meta.outputs.push(output);
            write_json(&meta_path, &meta)?;
        }
        Ok(())
    }

    /// Directory of the file-set at `uri`; its files live in `CONTENT_DIR`.
    fn fileset_dir(&self, uri: &str) -> Result<PathBuf> {
        let dir = self.resolve(uri)?;
        if uri.split('/').any(|seg| seg.starts_with('.')) {
            return Err(StoreError::invalid_path(uri, "names starting with '.' are reserved"));
        }
        Ok(dir)
    }

    /// Content directory of an existing file-set.
    fn stored_content(&self, uri: &str) -> Result<PathBuf> {
        let content = self.fileset_dir(uri)?.join(CONTENT_DIR);
        if !content.is_dir() {
            return Err(StoreError::NotFound(uri.to_string()));
        }
        Ok(content)
    }

    /// Replaces the content of the file-set at `uri`, leaving nested file-sets alone.
    fn store_files(&self, uri: &str, local: &Path) -> Result<()> {
        let entry_dir = self.fileset_dir(uri)?;
        let content = entry_dir.join(CONTENT_DIR);
        if content.exists() {
            fs::remove_dir_all(&content)?;
        }
        fs::create_dir_all(&content)?;
        copy_tree(local, &content)?;
        let checksums = calculate_checksums(&content, self.digest, &[])?;
        write_json(&entry_dir.join(CHECKSUM_MANIFEST), &checksums)?;
        tracing::debug!(uri = %uri, files = checksums.len(), "stored file-set");
        Ok(())
    }

    fn field_file(&self, uri: &str) -> Result<PathBuf> {
        self.resolve(&format!("{uri}.json"))
    }

    fn provenance_file(&self, uri: &str) -> Result<PathBuf> {
        self.resolve(uri)?;
        Ok(self.root.join(PROVENANCE_DIR).join(format!("{uri}.json")))
    }
}

impl RemoteBackend for FileSystemBackend {
    type Session = FsSession;

    fn name(&self) -> &str {
        "fs"
    }

    fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    fn connect(&self) -> Result<FsSession> {
        if !self.root.is_dir() {
            return Err(StoreError::ConnectionFailure(format!(
                "repository root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(FsSession::default())
    }

    fn disconnect(&self, session: FsSession) -> Result<()> {
        tracing::trace!(operations = session.operations(), "fs session closed");
        Ok(())
    }

    fn lookup_container(&self, session: &mut FsSession, path: &str) -> Result<ContainerHandle> {
        session.tick();
        let dir = self.container_dir(path)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.handle_for(&dir)
    }

    fn list_child_containers(
        &self,
        session: &mut FsSession,
        container: &ContainerHandle,
    ) -> Result<Vec<ContainerHandle>> {
        session.tick();
        let children = self.resolve(&container.id)?.join(CHILDREN_DIR);
        if !children.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&children)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(self.handle_for(&entry.path())?);
            }
        }
        Ok(out)
    }

    fn create_container(
        &self,
        session: &mut FsSession,
        parent: Option<&ContainerHandle>,
        label: &str,
    ) -> Result<ContainerHandle> {
        session.tick();
        validate_label(label)?;
        let dir = match parent {
            Some(p) => self.resolve(&p.id)?.join(CHILDREN_DIR).join(label),
            None => self.root.join(label),
        };
        if dir.is_dir() {
            return Err(StoreError::AlreadyExists(self.relative(&dir)?));
        }
        if dir.exists() {
            return Err(StoreError::Conflict(self.relative(&dir)?));
        }
        if let Some(parent_dir) = dir.parent() {
            fs::create_dir_all(parent_dir)?;
        }
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(self.relative(&dir)?));
            }
            Err(e) => return Err(e.into()),
        }
        let meta = ContainerMeta {
            label: label.to_string(),
            created: Utc::now(),
            timestamp: None,
            age_seconds: None,
        };
        write_json(&dir.join(CONTAINER_META), &meta)?;
        self.handle_for(&dir)
    }

    fn list_analyses(&self, session: &mut FsSession, container: &ContainerHandle) -> Result<Vec<String>> {
        session.tick();
        let analyses = self.resolve(&container.id)?.join(ANALYSES_DIR);
        if !analyses.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&analyses)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix(NAMESPACE_DELIMITER))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_analysis(
        &self,
        session: &mut FsSession,
        parent: &ContainerHandle,
        name: &str,
        inputs: &[String],
    ) -> Result<ContainerHandle> {
        session.tick();
        validate_analysis_name(name)?;
        let dir = self
            .resolve(&parent.id)?
            .join(ANALYSES_DIR)
            .join(format!("{NAMESPACE_DELIMITER}{name}"));
        if dir.exists() {
            return Err(StoreError::AlreadyExists(self.relative(&dir)?));
        }
        fs::create_dir_all(&dir)?;
        let meta = AnalysisMeta {
            name: name.to_string(),
            created: Utc::now(),
            inputs: inputs.to_vec(),
            outputs: Vec::new(),
        };
        write_json(&dir.join(ANALYSIS_META), &meta)?;
        Ok(ContainerHandle::new(self.relative(&dir)?, name))
    }

    fn lookup_analysis(
        &self,
        session: &mut FsSession,
        parent: &ContainerHandle,
        name: &str,
    ) -> Result<ContainerHandle> {
        session.tick();
        validate_analysis_name(name)?;
        let dir = self
            .resolve(&parent.id)?
            .join(ANALYSES_DIR)
            .join(format!("{NAMESPACE_DELIMITER}{name}"));
        if !dir.is_dir() {
            return Err(StoreError::NotFound(format!(
                "analysis {name:?} in {}",
                parent.id
            )));
        }
        Ok(ContainerHandle::new(self.relative(&dir)?, name))
    }

    fn list_entries(
        &self,
        session: &mut FsSession,
        container: &ContainerHandle,
        namespace: &Namespace,
    ) -> Result<Vec<RemoteEntry>> {
        session.tick();
        let container_dir = self.resolve(&container.id)?;
        let base_dir = match namespace {
            Namespace::Primary => container_dir,
            Namespace::Derivative(name) => {
                validate_analysis_name(name)?;
                container_dir
                    .join(ANALYSES_DIR)
                    .join(format!("{NAMESPACE_DELIMITER}{name}"))
            }
        };
        if !base_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();

        let files = base_dir.join(FILES_DIR);
        if files.is_dir() {
            let mut walker = WalkDir::new(&files).min_depth(1).sort_by_file_name().into_iter();
            while let Some(item) = walker.next() {
                let item = item.map_err(walk_error)?;
                if !item.file_type().is_dir() {
                    continue;
                }
                if item.file_name() == CONTENT_DIR {
                    walker.skip_current_dir();
                    continue;
                }
                if !item.path().join(CONTENT_DIR).is_dir() {
                    continue;
                }
                let base = rel_key(&files, item.path())?;
                let path = EntryPath::new(base, namespace.clone())?;
                let uri = self.relative(item.path())?;
                entries.push(RemoteEntry {
                    path,
                    datatype: Datatype::FileSet,
                    uri,
                });
            }
        }

        let fields = base_dir.join(FIELDS_DIR);
        if fields.is_dir() {
            for item in WalkDir::new(&fields).min_depth(1).sort_by_file_name() {
                let item = item.map_err(walk_error)?;
                let is_json = item.path().extension().is_some_and(|ext| ext == "json");
                if !item.file_type().is_file() || !is_json {
                    continue;
                }
                let stem = item.path().with_extension("");
                let base = rel_key(&fields, &stem)?;
                let path = EntryPath::new(base, namespace.clone())?;
                let uri = self.relative(&stem)?;
                entries.push(RemoteEntry {
                    path,
                    datatype: Datatype::Field,
                    uri,
                });
            }
        }

        Ok(entries)
    }

    fn entry_uri(&self, container: &ContainerHandle, path: &EntryPath, datatype: Datatype) -> String {
        let kind = match datatype {
            Datatype::FileSet => FILES_DIR,
            Datatype::Field => FIELDS_DIR,
        };
        format!("{}/{kind}/{}", container.id, path.base())
    }

    fn upload_fileset(&self, session: &mut FsSession, uri: &str, local: &Path) -> Result<()> {
        session.tick();
        self.store_files(uri, local)
    }

    fn upload_analysis_output(&self, session: &mut FsSession, uri: &str, local: &Path) -> Result<()> {
        session.tick();
        if self.analysis_dir_of(uri)?.is_none() {
            return Err(StoreError::UnsupportedOperation(format!(
                "{uri} is not inside an analysis"
            )));
        }
        self.store_files(uri, local)?;
        self.record_output(uri)
    }

    fn upload_value(&self, session: &mut FsSession, uri: &str, value: &FieldValue) -> Result<()> {
        session.tick();
        let file = self.field_file(uri)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&file, value)?;
        self.record_output(uri)
    }

    fn download_fileset(&self, session: &mut FsSession, uri: &str, dest: &Path) -> Result<()> {
        session.tick();
        let content = self.stored_content(uri)?;
        fs::create_dir_all(dest)?;
        copy_tree(&content, dest)?;
        Ok(())
    }

    fn download_value(&self, session: &mut FsSession, uri: &str) -> Result<FieldValue> {
        session.tick();
        let file = self.field_file(uri)?;
        if !file.is_file() {
            return Err(StoreError::NotFound(uri.to_string()));
        }
        read_json(&file)
    }

    fn remote_checksums(&self, session: &mut FsSession, uri: &str) -> Result<Checksums> {
        session.tick();
        let content = self.stored_content(uri)?;
        let manifest = self.fileset_dir(uri)?.join(CHECKSUM_MANIFEST);
        if manifest.is_file() {
            read_json(&manifest)
        } else {
            calculate_checksums(&content, self.digest, &[])
        }
    }

    fn get_provenance(&self, session: &mut FsSession, uri: &str) -> Result<Option<Value>> {
        session.tick();
        let file = self.provenance_file(uri)?;
        if !file.is_file() {
            return Ok(None);
        }
        read_json(&file).map(Some)
    }

    fn put_provenance(&self, session: &mut FsSession, uri: &str, record: &Value) -> Result<()> {
        session.tick();
        let file = self.provenance_file(uri)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&file, record)
    }

    fn save_dataset_definition(
        &self,
        session: &mut FsSession,
        dataset: &str,
        definition: &Value,
        name: &str,
    ) -> Result<()> {
        session.tick();
        validate_label(name)?;
        let dir = self.container_dir(dataset)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(dataset.to_string()));
        }
        let defs = dir.join(DEFINITIONS_DIR);
        fs::create_dir_all(&defs)?;
        write_json(&defs.join(format!("{name}.json")), definition)
    }

    fn load_dataset_definition(&self, session: &mut FsSession, dataset: &str, name: &str) -> Result<Value> {
        session.tick();
        validate_label(name)?;
        let file = self
            .container_dir(dataset)?
            .join(DEFINITIONS_DIR)
            .join(format!("{name}.json"));
        if !file.is_file() {
            return Err(StoreError::NotFound(format!("definition {name:?} of {dataset}")));
        }
        read_json(&file)
    }
}

fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() || label == "." || label == ".." {
        return Err(StoreError::invalid_path(label, "empty or relative label"));
    }
    if label.starts_with('.') {
        return Err(StoreError::invalid_path(label, "labels may not start with '.'"));
    }
    if label.contains(['/', '\\']) {
        return Err(StoreError::invalid_path(label, "label contains a path separator"));
    }
    Ok(())
}

fn validate_analysis_name(name: &str) -> Result<()> {
    if name.contains(['/', '\\', NAMESPACE_DELIMITER]) || name == "." || name == ".." {
        return Err(StoreError::invalid_path(name, "not a valid analysis name"));
    }
    Ok(())
}

fn walk_error(e: walkdir::Error) -> StoreError {
    match e.into_io_error() {
        Some(io) => StoreError::Io(io),
        None => StoreError::Io(io::Error::other("directory walk failed")),
    }
}

fn rel_key(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| StoreError::invalid_path(path.display().to_string(), "outside entry directory"))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Copies every regular file under `src` into `dest`, chunk by chunk.
///
/// Each chunk is written as soon as it is read so watchers of `dest` see
/// steady progress.
fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut bytes = 0;
    for item in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let item = item.map_err(walk_error)?;
        let rel = item
            .path()
            .strip_prefix(src)
            .map_err(|_| StoreError::invalid_path(item.path().display().to_string(), "outside source"))?;
        let target = dest.join(rel);
        if item.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        bytes += copy_incremental(item.path(), &target)?;
    }
    Ok(bytes)
}

fn copy_incremental(src: &Path, dest: &Path) -> Result<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = File::create(dest)?;
    let mut buffer = [0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    writer.sync_all()?;
    Ok(total)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
