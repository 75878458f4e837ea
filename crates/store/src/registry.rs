//! Image lookups by appc name and labels.

use crate::error::{StoreError, StoreResult};
use crate::manifest::ImageManifest;
use crate::manifest_cache::AciManifestCache;
use crate::store::{BlobReader, Store};
use std::sync::Arc;
use stowage_core::distribution::Appc;

/// Resolves appc image identities against the ref index and reads image
/// content through the blob store and manifest cache.
pub struct AciRegistry {
    store: Arc<Store>,
    cache: Arc<AciManifestCache>,
}

impl AciRegistry {
    pub fn new(store: Arc<Store>, cache: Arc<AciManifestCache>) -> Self {
        Self { store, cache }
    }

    /// The digest of the image matching the given name and labels.
    pub fn get_aci(&self, name: &str, labels: &[(String, String)]) -> StoreResult<String> {
        let appc = Appc::new(name, labels.iter().cloned())?;
        match self.store.get_ref(&appc.canonical_string()) {
            Ok(digest) => Ok(digest),
            Err(StoreError::RefNotFound(_)) => Err(StoreError::AciNotFound {
                name: name.to_string(),
                labels: labels.to_vec(),
            }),
            Err(e) => Err(e),
        }
    }

    /// The manifest of the image with the given digest.
    pub fn get_image_manifest(&self, digest: &str) -> StoreResult<ImageManifest> {
        self.cache.get_manifest(digest)
    }

    /// A readable stream of the image blob.
    pub fn read_stream(&self, digest: &str) -> StoreResult<BlobReader> {
        self.store.read_blob(digest)
    }

    /// Resolve a possibly partial digest to a full one.
    pub fn resolve_key(&self, digest: &str) -> StoreResult<String> {
        self.store.resolve_digest(digest)
    }
}
