//! Registers the entries visible at a tree row.

use std::collections::BTreeSet;

use super::backend::{RemoteBackend, RemoteEntry};
use super::resolver::resolve_row;
use crate::data::{DataTree, Namespace, RowId};
use crate::error::{Result, StoreError};

/// Enumerates primary and derivative entries of `row` and registers them.
///
/// Derivatives are listed for every analysis recorded at the row or any of
/// its ancestors; an analysis with nothing stored at this row contributes no
/// entries. Entries already registered (e.g. created locally before an
/// upload) are kept as they are. Returns the number of newly registered
/// entries; a row that is already populated is left untouched.
pub fn populate_row<B: RemoteBackend>(
    backend: &B,
    session: &mut B::Session,
    group: &str,
    tree: &mut DataTree,
    row: RowId,
) -> Result<usize> {
    if tree.row(row).is_populated() {
        return Ok(0);
    }

    let container = resolve_row(backend, session, group, tree, row)?;

    let mut analyses: BTreeSet<String> = backend
        .list_analyses(session, &container)?
        .into_iter()
        .collect();
    for ancestor in tree.ancestors(row) {
        let above = resolve_row(backend, session, group, tree, ancestor)?;
        analyses.extend(backend.list_analyses(session, &above)?);
    }

    let mut found = backend.list_entries(session, &container, &Namespace::Primary)?;
    check_namespace(&found, &Namespace::Primary)?;
    for name in &analyses {
        let namespace = Namespace::derivative(name.clone())?;
        let derived = backend.list_entries(session, &container, &namespace)?;
        check_namespace(&derived, &namespace)?;
        found.extend(derived);
    }

    let mut added = 0;
    for remote in found {
        if tree.find_entry(row, &remote.path).is_some() {
            continue;
        }
        tree.add_entry(row, remote.path, remote.datatype, remote.uri)?;
        added += 1;
    }
    tree.row_mut(row).populated = true;

    tracing::debug!(
        dataset = %tree.dataset_id(),
        row = ?tree.row(row).ids(),
        analyses = analyses.len(),
        added,
        "row populated"
    );
    Ok(added)
}

fn check_namespace(entries: &[RemoteEntry], expected: &Namespace) -> Result<()> {
    match entries.iter().find(|e| e.path.namespace() != expected) {
        Some(stray) => Err(StoreError::Conflict(format!(
            "backend listed {} under namespace {:?}",
            stray.path, expected
        ))),
        None => Ok(()),
    }
}
