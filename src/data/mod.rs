//! Dataset data model: tree, rows, entries and the entry address scheme.

pub mod entry;
pub mod path;
pub mod row;
pub mod space;
pub mod tree;
pub mod value;

pub use entry::{DataEntry, Datatype, EntryId};
pub use path::{EntryPath, NAMESPACE_DELIMITER, Namespace};
pub use row::DataRow;
pub use space::{Frequency, Hierarchy};
pub use tree::{DataTree, RowId};
pub use value::FieldValue;
