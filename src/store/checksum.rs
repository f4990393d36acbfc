//! File-set digests and staleness detection.
//!
//! A cached file-set is fresh only if its local digests and the backend's
//! recorded digests have identical key sets and identical values. Anything
//! else, including a file present on one side only, marks it stale.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};

/// Relative file path (always `/`-separated) to hex digest.
pub type Checksums = BTreeMap<String, String>;

/// Digest algorithm a backend records for stored files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(StoreError::UnsupportedOperation(format!(
                "digest algorithm {other:?}"
            ))),
        }
    }
}

impl DigestAlgorithm {
    /// Hex digest of one file, read in fixed-size chunks.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        match self {
            Self::Sha256 => digest_reader::<Sha256>(File::open(path)?),
            Self::Sha512 => digest_reader::<Sha512>(File::open(path)?),
        }
    }
}

fn digest_reader<D: Digest>(file: File) -> Result<String> {
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();

    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Digests of every regular file under `dir`, keyed by path relative to it.
///
/// File names listed in `skip` are ignored at any depth.
pub fn calculate_checksums(dir: &Path, algorithm: DigestAlgorithm, skip: &[&str]) -> Result<Checksums> {
    let mut checksums = Checksums::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => StoreError::Io(io),
            None => StoreError::Io(std::io::Error::other("directory walk failed")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| skip.contains(&name))
        {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| StoreError::invalid_path(entry.path().display().to_string(), "outside file-set"))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        checksums.insert(key, algorithm.digest_file(entry.path())?);
    }
    Ok(checksums)
}

/// Outcome of comparing local digests against remote ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Unchanged,
    Stale {
        /// Present on both sides with different digests.
        changed: Vec<String>,
        /// Present remotely only.
        missing_local: Vec<String>,
        /// Present locally only.
        missing_remote: Vec<String>,
    },
}

impl ChecksumStatus {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    pub fn is_stale(&self) -> bool {
        !self.is_unchanged()
    }
}

pub fn compare_checksums(local: &Checksums, remote: &Checksums) -> ChecksumStatus {
    let mut changed = Vec::new();
    let mut missing_remote = Vec::new();
    for (path, digest) in local {
        match remote.get(path) {
            Some(other) if other.eq_ignore_ascii_case(digest) => {}
            Some(_) => changed.push(path.clone()),
            None => missing_remote.push(path.clone()),
        }
    }
    let missing_local: Vec<String> = remote
        .keys()
        .filter(|p| !local.contains_key(*p))
        .cloned()
        .collect();

    if changed.is_empty() && missing_local.is_empty() && missing_remote.is_empty() {
        ChecksumStatus::Unchanged
    } else {
        ChecksumStatus::Stale {
            changed,
            missing_local,
            missing_remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sums(pairs: &[(&str, &str)]) -> Checksums {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_digest_file_sha256() {
        let tmp = tempfile::tempdir().unwrap();
        let file_path = tmp.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();
        assert_eq!(
            DigestAlgorithm::Sha256.digest_file(&file_path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            DigestAlgorithm::Sha512.digest_file(&file_path).unwrap().len(),
            128
        );
    }

    #[test]
    fn test_calculate_checksums_relative_keys() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("a.nii"), b"a").unwrap();
        fs::write(tmp.path().join("sub/b.json"), b"{}").unwrap();
        fs::write(tmp.path().join(".checksums.json"), b"{}").unwrap();

        let sums =
            calculate_checksums(tmp.path(), DigestAlgorithm::Sha256, &[".checksums.json"]).unwrap();
        let keys: Vec<_> = sums.keys().cloned().collect();
        assert_eq!(keys, vec!["a.nii".to_string(), "sub/b.json".to_string()]);
    }

    #[test]
    fn test_compare_is_reflexive() {
        let local = sums(&[("a", "1"), ("b", "2")]);
        assert!(compare_checksums(&local, &local).is_unchanged());
        assert!(compare_checksums(&Checksums::new(), &Checksums::new()).is_unchanged());
    }

    #[test]
    fn test_compare_detects_changed_value() {
        let local = sums(&[("a", "1"), ("b", "2")]);
        let remote = sums(&[("a", "1"), ("b", "3")]);
        assert_eq!(
            compare_checksums(&local, &remote),
            ChecksumStatus::Stale {
                changed: vec!["b".into()],
                missing_local: vec![],
                missing_remote: vec![],
            }
        );
    }

    #[test]
    fn test_compare_detects_extra_and_missing_keys() {
        let local = sums(&[("a", "1")]);
        let remote = sums(&[("a", "1"), ("b", "2")]);
        assert!(compare_checksums(&local, &remote).is_stale());
        assert!(compare_checksums(&remote, &local).is_stale());
    }

    #[test]
    fn test_digest_case_insensitive() {
        let local = sums(&[("a", "ABCD")]);
        let remote = sums(&[("a", "abcd")]);
        assert!(compare_checksums(&local, &remote).is_unchanged());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
