//! Rendered filesystem trees for the stowage image store.
//!
//! A tree materializes an image blob and its transitive dependencies into
//! a populated directory with a deterministic checksum, so a runtime can
//! execute from it and later verify it has not drifted.

pub mod checksum;
pub mod error;
pub mod info;
pub mod tree;

pub use error::{TreeStoreError, TreeStoreResult};
pub use info::TreeInfo;
pub use tree::{Store, deps_id};
