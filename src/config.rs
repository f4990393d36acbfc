//! Store configuration.
//!
//! Read from `~/.config/dataset-sync/store.toml` unless a path is given:
//!
//! ```toml
//! backend = "fs"
//! root = "/srv/datasets"
//! group = "arcana"
//! hierarchy = ["subject", "session"]
//! leaf_order = "chronological"
//! digest = "sha256"
//! ```
//!
//! `DSYNC_ROOT` in the environment (or a `.env` file) overrides `root`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::backends::FileSystemBackend;
use crate::data::Hierarchy;
use crate::store::{DigestAlgorithm, LeafOrder, RemoteStore};

/// Environment variable overriding [`StoreConfig::root`].
pub const ROOT_ENV: &str = "DSYNC_ROOT";

const CONFIG_FILE: &str = "store.toml";
const APP_DIR: &str = "dataset-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// [`FileSystemBackend`] rooted at [`StoreConfig::root`].
    #[default]
    Fs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub root: PathBuf,
    pub group: String,
    pub hierarchy: Hierarchy,
    pub leaf_order: LeafOrder,
    pub digest: DigestAlgorithm,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: dirs::data_local_dir()
                .map(|d| d.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from(".")),
            group: "arcana".to_string(),
            hierarchy: Hierarchy::default(),
            leaf_order: LeafOrder::default(),
            digest: DigestAlgorithm::default(),
        }
    }
}

impl StoreConfig {
    /// `<config dir>/dataset-sync/store.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parses the file at `path`; it must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` if given, else the default file if present, else
    /// defaults; then applies the environment override.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_root_override(std::env::var(ROOT_ENV).ok());
        Ok(config)
    }

    pub fn apply_root_override(&mut self, root: Option<String>) {
        if let Some(root) = root.filter(|r| !r.trim().is_empty()) {
            tracing::debug!(root = %root, "root overridden from environment");
            self.root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            bail!("config: root must not be empty");
        }
        if self.group.contains('/') {
            bail!("config: group {:?} must be a single label", self.group);
        }
        Ok(())
    }

    pub fn build_store(&self) -> Result<RemoteStore<FileSystemBackend>> {
        self.validate()?;
        let backend = match self.backend {
            BackendKind::Fs => FileSystemBackend::new(&self.root).with_digest(self.digest),
        };
        Ok(RemoteStore::new(backend, self.group.clone())
            .with_hierarchy(self.hierarchy.clone())
            .with_leaf_order(self.leaf_order))
    }
}
