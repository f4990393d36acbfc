//! Maps tree rows onto remote containers.

use super::backend::{ContainerHandle, RemoteBackend};
use crate::data::{DataTree, Frequency, Hierarchy, RowId};
use crate::error::{Result, StoreError};

/// Label path of the container for a row of `frequency` with the given IDs.
///
/// The dataset row maps to the dataset container; a row at a hierarchy level
/// maps to the container reached by that level's ID and those above it.
/// Frequencies outside the hierarchy cannot be addressed.
pub fn container_path<S: AsRef<str>>(
    group: &str,
    dataset_id: &str,
    hierarchy: &Hierarchy,
    frequency: Frequency,
    ids: &[S],
) -> Result<String> {
    let depth = hierarchy.depth_of(frequency).ok_or_else(|| {
        StoreError::UnsupportedOperation(format!(
            "{frequency} rows are not addressable in hierarchy {:?}",
            hierarchy.levels()
        ))
    })?;
    if ids.len() < depth {
        return Err(StoreError::InvalidHierarchy(format!(
            "{frequency} row needs {depth} IDs, got {}",
            ids.len()
        )));
    }

    let mut segments: Vec<&str> = Vec::with_capacity(depth + 2);
    if !group.is_empty() {
        segments.push(group);
    }
    segments.push(dataset_id);
    segments.extend(ids[..depth].iter().map(|s| s.as_ref()));
    Ok(segments.join("/"))
}

/// Dataset container path (no row IDs).
pub fn dataset_path(group: &str, dataset_id: &str) -> String {
    if group.is_empty() {
        dataset_id.to_string()
    } else {
        format!("{group}/{dataset_id}")
    }
}

/// Looks up the remote container backing `row`.
pub fn resolve_row<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    tree: &DataTree,
    row: RowId,
) -> Result<ContainerHandle> {
    let data_row = tree.row(row);
    let path = container_path(
        group,
        tree.dataset_id(),
        tree.hierarchy(),
        data_row.frequency(),
        data_row.ids(),
    )?;
    backend.lookup_container(session, &path)
}
