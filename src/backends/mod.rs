//! Concrete [`crate::store::RemoteBackend`] implementations.

pub mod fs;

pub use fs::{FileSystemBackend, FsSession};
