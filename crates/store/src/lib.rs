//! Content-addressed blob and ref store for the stowage image store.
//!
//! Blobs are opaque byte sequences addressed by their content digest, with
//! per-blob metadata, typed side-data and named refs kept in embedded KV
//! databases. Per-digest advisory file locks coordinate cooperating
//! processes. A manifest cache extracts and memoizes manifests from
//! archive-format blobs.

pub mod blob_data;
pub mod blob_info;
pub mod datadir;
pub mod error;
pub mod kvdb;
pub mod lockfile;
pub mod manifest;
pub mod manifest_cache;
pub mod ref_entry;
pub mod registry;
pub mod store;

pub use blob_data::BlobData;
pub use blob_info::BlobInfo;
pub use error::{StoreError, StoreResult};
pub use lockfile::KeyLock;
pub use manifest::{Dependency, ImageManifest, Label};
pub use manifest_cache::AciManifestCache;
pub use ref_entry::Ref;
pub use registry::AciRegistry;
pub use store::{BlobReader, Store};
