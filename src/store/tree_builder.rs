//! Discovers the remote hierarchy and rebuilds it as a [`DataTree`].
//!
//! Leaf insertion order feeds ID inference downstream, so it must not depend
//! on the backend's listing order: intermediate levels are sorted by label and
//! leaves by the configured [`LeafOrder`]. The whole hierarchy is discovered
//! before any leaf is added, so a failed lookup never yields a partial tree.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backend::{ContainerHandle, RemoteBackend};
use super::resolver::dataset_path;
use crate::data::{DataTree, Hierarchy};
use crate::error::Result;

/// Seconds in a (non-leap) year; ages are reported in years.
pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;

/// Age reported for leaves whose source carries no age.
pub const MISSING_AGE: f64 = -1.0;

/// Ordering applied to leaf-level containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafOrder {
    /// By acquisition timestamp; untimed leaves last, ties by label.
    #[default]
    Chronological,
    /// By label, like the intermediate levels.
    Label,
}

impl LeafOrder {
    fn compare(&self, a: &ContainerHandle, b: &ContainerHandle) -> Ordering {
        match self {
            Self::Chronological => (a.timestamp.is_none(), a.timestamp, &a.label, &a.id).cmp(&(
                b.timestamp.is_none(),
                b.timestamp,
                &b.label,
                &b.id,
            )),
            Self::Label => by_label(a, b),
        }
    }
}

fn by_label(a: &ContainerHandle, b: &ContainerHandle) -> Ordering {
    (&a.label, &a.id).cmp(&(&b.label, &b.id))
}

/// Derived metadata registered with each leaf.
pub fn leaf_metadata(container: &ContainerHandle) -> Map<String, Value> {
    let mut metadata = Map::new();
    let date = container
        .timestamp
        .map(|ts| Value::from(ts.format("%Y%m%d").to_string()))
        .unwrap_or(Value::Null);
    metadata.insert("date".into(), date);
    let age = container
        .age_seconds
        .map(|secs| secs / SECONDS_PER_YEAR)
        .unwrap_or(MISSING_AGE);
    metadata.insert("age".into(), Value::from(age));
    metadata
}

/// Builds the tree of `dataset_id` from the containers under its dataset container.
///
/// Fails if the dataset container (or any listing) cannot be read.
pub fn build_tree<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    dataset_id: &str,
    hierarchy: &Hierarchy,
    leaf_order: LeafOrder,
) -> Result<DataTree> {
    let dataset = backend.lookup_container(session, &dataset_path(group, dataset_id))?;
    tracing::debug!(dataset = %dataset_id, container = %dataset.id, "scanning dataset");

    let mut leaves = Vec::new();
    let mut ids = Vec::with_capacity(hierarchy.depth());
    collect_leaves(
        backend,
        session,
        &dataset,
        hierarchy.depth(),
        leaf_order,
        &mut ids,
        &mut leaves,
    )?;

    let mut tree = DataTree::new(dataset_id, hierarchy.clone());
    for (leaf_ids, metadata) in &leaves {
        tree.add_leaf(leaf_ids.as_slice(), metadata.clone())?;
    }

    tracing::info!(
        dataset = %dataset_id,
        leaves = leaves.len(),
        rows = tree.row_count(),
        "tree populated"
    );
    Ok(tree)
}

fn collect_leaves<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    container: &ContainerHandle,
    remaining: usize,
    leaf_order: LeafOrder,
    ids: &mut Vec<String>,
    leaves: &mut Vec<(Vec<String>, Map<String, Value>)>,
) -> Result<()> {
    let mut children = backend.list_child_containers(session, container)?;
    if remaining == 1 {
        children.sort_by(|a, b| leaf_order.compare(a, b));
        for child in &children {
            ids.push(child.label.clone());
            leaves.push((ids.clone(), leaf_metadata(child)));
            ids.pop();
        }
        return Ok(());
    }

    children.sort_by(by_label);
    for child in &children {
        tracing::debug!(container = %child.id, label = %child.label, "descending");
        ids.push(child.label.clone());
        collect_leaves(backend, session, child, remaining - 1, leaf_order, ids, leaves)?;
        ids.pop();
    }
    Ok(())
}
