//! Uploads and downloads of entry contents.
//!
//! Downloads go through a caller-provided staging directory that sibling
//! processes watch to detect stalled transfers, so every download writes into
//! it incrementally and only the finished result is moved into the cache.
//!
//! # Example
//!
//! ```rust,ignore
//! use dataset_sync::store::transfer::{self, SyncOutcome};
//!
//! let outcome = transfer::sync_fileset(&backend, &mut session, entry, &cache, &staging)?;
//! if let SyncOutcome::Downloaded { files, .. } = outcome {
//!     println!("refreshed {files} files");
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::backend::RemoteBackend;
use super::checksum::{ChecksumStatus, Checksums, calculate_checksums, compare_checksums};
use super::resolver::resolve_row;
use crate::data::{DataEntry, DataTree, Datatype, EntryId, EntryPath, FieldValue, Namespace, RowId};
use crate::error::{Result, StoreError};

/// Registers a new entry in `row`, creating whatever the backend needs to hold it.
///
/// Derivative entries live in an analysis container named after their
/// namespace, created on first use with `inputs` recorded as provenance; an
/// existing analysis is reused. Primary entries are addressed inside the row
/// container itself. An entry already registered at `path` is returned as is.
#[allow(clippy::too_many_arguments)]
pub fn create_entry<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    tree: &mut DataTree,
    row: RowId,
    path: EntryPath,
    datatype: Datatype,
    inputs: &[String],
) -> Result<EntryId> {
    if let Some(existing) = tree.find_entry(row, &path) {
        return Ok(existing.id());
    }

    let container = resolve_row(backend, session, group, tree, row)?;
    let target = match path.namespace() {
        Namespace::Primary => container,
        Namespace::Derivative(name) => {
            match backend.create_analysis(session, &container, name, inputs) {
                Ok(analysis) => analysis,
                Err(e) if e.is_already_exists() => {
                    tracing::debug!(analysis = %name, container = %container.id, "analysis already present");
                    backend.lookup_analysis(session, &container, name)?
                }
                Err(e) => return Err(e),
            }
        }
    };

    let uri = backend.entry_uri(&target, &path, datatype);
    tracing::debug!(path = %path, uri = %uri, "created entry");
    tree.add_entry(row, path, datatype, uri)
}

/// Uploads the files under `local` to a file-set entry.
///
/// Derivatives are stored as outputs of their analysis, primary entries
/// directly in their container.
pub fn upload_fileset<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    entry: &DataEntry,
    local: &Path,
) -> Result<()> {
    expect_kind(entry, Datatype::FileSet)?;
    if !local.is_dir() {
        return Err(StoreError::NotFound(format!(
            "staged directory {}",
            local.display()
        )));
    }
    if entry.is_derivative() {
        backend.upload_analysis_output(session, entry.uri(), local)
    } else {
        backend.upload_fileset(session, entry.uri(), local)
    }
}

pub fn upload_value<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    entry: &DataEntry,
    value: &FieldValue,
) -> Result<()> {
    expect_kind(entry, Datatype::Field)?;
    backend.upload_value(session, entry.uri(), value)
}

pub fn download_value<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    entry: &DataEntry,
) -> Result<FieldValue> {
    expect_kind(entry, Datatype::Field)?;
    backend.download_value(session, entry.uri())
}

/// Downloads a file-set into a fresh sub-directory of `staging_dir` and
/// returns it.
///
/// The returned directory holds the entry's files and nothing else, whatever
/// else already sits in `staging_dir`.
pub fn download_fileset<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    entry: &DataEntry,
    staging_dir: &Path,
) -> Result<PathBuf> {
    expect_kind(entry, Datatype::FileSet)?;
    let output_dir = staging_dir.join(staging_dirname(entry.uri()));
    if output_dir.exists() {
        // Leftover from an interrupted transfer.
        fs::remove_dir_all(&output_dir)?;
    }
    fs::create_dir_all(&output_dir)?;

    let start = Instant::now();
    backend.download_fileset(session, entry.uri(), &output_dir)?;
    let (files, bytes) = dir_totals(&output_dir)?;
    tracing::info!(
        uri = %entry.uri(),
        files,
        bytes,
        duration_ms = start.elapsed().as_millis() as u64,
        "download completed"
    );
    Ok(output_dir)
}

/// Result of [`sync_fileset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Cached copy matches the remote digests; nothing was transferred.
    Fresh,
    /// Cached copy was missing or stale and has been replaced.
    Downloaded {
        status: ChecksumStatus,
        files: usize,
        checksums: Checksums,
    },
}

/// Brings `cache_dir` up to date with a remote file-set.
///
/// The cache is compared against the backend's recorded digests; on any
/// mismatch the file-set is downloaded through `staging_dir`, verified, and
/// only then swapped in place of the cached copy.
pub fn sync_fileset<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    entry: &DataEntry,
    cache_dir: &Path,
    staging_dir: &Path,
) -> Result<SyncOutcome> {
    let algorithm = backend.digest_algorithm();
    let remote = backend.remote_checksums(session, entry.uri())?;

    let local = if cache_dir.is_dir() {
        calculate_checksums(cache_dir, algorithm, &[])?
    } else {
        Checksums::new()
    };
    let status = compare_checksums(&local, &remote);
    if status.is_unchanged() && cache_dir.is_dir() {
        tracing::debug!(uri = %entry.uri(), "cache is fresh");
        return Ok(SyncOutcome::Fresh);
    }

    let downloaded = download_fileset(backend, session, entry, staging_dir)?;
    let fetched = calculate_checksums(&downloaded, algorithm, &[])?;
    if let ChecksumStatus::Stale {
        changed,
        missing_local,
        missing_remote,
    } = compare_checksums(&fetched, &remote)
    {
        let _ = fs::remove_dir_all(&downloaded);
        return Err(StoreError::Conflict(format!(
            "{} changed during download ({} differing, {} missing, {} unexpected)",
            entry.uri(),
            changed.len(),
            missing_local.len(),
            missing_remote.len()
        )));
    }

    install(&downloaded, cache_dir)?;
    Ok(SyncOutcome::Downloaded {
        status,
        files: fetched.len(),
        checksums: fetched,
    })
}

/// Replaces `target` with `staged` via rename.
fn install(staged: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staged, target)?;
    Ok(())
}

fn expect_kind(entry: &DataEntry, kind: Datatype) -> Result<()> {
    if entry.datatype() == kind {
        Ok(())
    } else {
        Err(StoreError::UnsupportedOperation(format!(
            "{} is a {} entry, not a {kind}",
            entry.path(),
            entry.datatype()
        )))
    }
}

/// Number of regular files under `dir` and their total size.
pub(crate) fn dir_totals(dir: &Path) -> Result<(u64, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| {
            StoreError::Io(e.into_io_error().unwrap_or_else(|| io::Error::other("directory walk failed")))
        })?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += fs::metadata(entry.path())?.len();
        }
    }
    Ok((files, bytes))
}

/// Name of the staging sub-directory for an entry URI.
///
/// Hex SHA-256 of the URI, so distinct URIs never share a directory and
/// no URI can name the staging directory itself or its parent.
pub fn staging_dirname(uri: &str) -> String {
    hex::encode(Sha256::digest(uri.as_bytes()))
}

// =============================================================================
// Batched uploads
// =============================================================================

/// Content to push to one entry.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Files(PathBuf),
    Value(FieldValue),
}

/// One item of a batched upload.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub row: RowId,
    pub path: EntryPath,
    pub source: UploadSource,
    /// URIs of the entries this one was derived from.
    pub inputs: Vec<String>,
}

impl UploadItem {
    pub fn datatype(&self) -> Datatype {
        match self.source {
            UploadSource::Files(_) => Datatype::FileSet,
            UploadSource::Value(_) => Datatype::Field,
        }
    }
}

/// What happened to a single upload item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded,
    /// Remote content already matched; nothing was sent.
    AlreadyPresent,
    Failed(String),
}

/// Result of uploading a single entry.
#[derive(Debug, Clone)]
pub struct EntryTransferResult {
    /// Logical entry path.
    pub path: String,
    /// IDs of the row the entry belongs to.
    pub row: Vec<String>,
    pub outcome: TransferOutcome,
    /// Number of files sent.
    pub files_transferred: u64,
    /// Total bytes sent.
    pub bytes_transferred: u64,
    pub duration_ms: u64,
}

/// Report from a batched upload.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub dataset_id: String,
    pub results: Vec<EntryTransferResult>,
    pub total_duration_ms: u64,
    /// False once any item failed.
    pub all_succeeded: bool,
}

impl TransferReport {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            results: Vec::new(),
            total_duration_ms: 0,
            all_succeeded: true,
        }
    }

    pub fn add_result(&mut self, result: EntryTransferResult) {
        if matches!(result.outcome, TransferOutcome::Failed(_)) {
            self.all_succeeded = false;
        }
        self.results.push(result);
    }

    pub fn total_files(&self) -> u64 {
        self.results.iter().map(|r| r.files_transferred).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_transferred).sum()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Uploaded))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::AlreadyPresent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&TransferOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Creates (or reuses) and uploads every item in order.
///
/// File-sets whose remote digests already match the staged files are skipped
/// as already present. The first failure is recorded and ends the batch;
/// anything uploaded before it stays in place.
pub fn upload_all<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    tree: &mut DataTree,
    items: Vec<UploadItem>,
) -> TransferReport {
    let overall_start = Instant::now();
    let mut report = TransferReport::new(tree.dataset_id());

    for item in items {
        let start = Instant::now();
        let mut result = EntryTransferResult {
            path: item.path.to_string(),
            row: tree.row(item.row).ids().to_vec(),
            outcome: TransferOutcome::Uploaded,
            files_transferred: 0,
            bytes_transferred: 0,
            duration_ms: 0,
        };

        match upload_item(backend, session, group, tree, &item) {
            Ok((outcome, files, bytes)) => {
                result.outcome = outcome;
                result.files_transferred = files;
                result.bytes_transferred = bytes;
            }
            Err(e) => {
                tracing::warn!(path = %item.path, error = %e, "upload failed");
                result.outcome = TransferOutcome::Failed(e.to_string());
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        let failed = matches!(result.outcome, TransferOutcome::Failed(_));
        report.add_result(result);
        if failed {
            break;
        }
    }

    report.total_duration_ms = overall_start.elapsed().as_millis() as u64;
    tracing::info!(
        dataset = %report.dataset_id,
        uploaded = report.uploaded(),
        already_present = report.already_present(),
        failed = report.failed(),
        "batch upload finished"
    );
    report
}

fn upload_item<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    tree: &mut DataTree,
    item: &UploadItem,
) -> Result<(TransferOutcome, u64, u64)> {
    let entry_id = create_entry(
        backend,
        session,
        group,
        tree,
        item.row,
        item.path.clone(),
        item.datatype(),
        &item.inputs,
    )?;
    let entry = tree.entry(entry_id);
    if entry.datatype() != item.datatype() {
        return Err(StoreError::Conflict(format!(
            "{} is registered as a {} entry",
            entry.path(),
            entry.datatype()
        )));
    }

    match &item.source {
        UploadSource::Value(value) => {
            upload_value(backend, session, entry, value)?;
            Ok((TransferOutcome::Uploaded, 0, 0))
        }
        UploadSource::Files(local) => {
            if !local.is_dir() {
                return Err(StoreError::NotFound(format!(
                    "staged directory {}",
                    local.display()
                )));
            }
            let staged = calculate_checksums(local, backend.digest_algorithm(), &[])?;
            match backend.remote_checksums(session, entry.uri()) {
                Ok(remote) if !remote.is_empty() && compare_checksums(&staged, &remote).is_unchanged() => {
                    return Ok((TransferOutcome::AlreadyPresent, 0, 0));
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            upload_fileset(backend, session, entry, local)?;
            let (files, bytes) = dir_totals(local)?;
            Ok((TransferOutcome::Uploaded, files, bytes))
        }
    }
}
