//! Mirror hierarchical datasets held by a remote backend into a local tree,
//! and move entry contents between the two.

pub mod backends;
pub mod config;
pub mod data;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
