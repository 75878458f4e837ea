//! Common test fixtures.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use stowage_core::Algorithm;
use stowage_store::{AciManifestCache, Store as BlobStore};

pub const ACI_MEDIA_TYPE: &str = "application/vnd.appc.aci";

/// A blob store, manifest cache and tree store sharing one data directory.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub store: Arc<BlobStore>,
    pub cache: Arc<AciManifestCache>,
    pub trees: stowage_treestore::Store,
}

pub fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlobStore::new(dir.path().join("casref")).unwrap());
    let cache = Arc::new(
        AciManifestCache::new(dir.path().join("manifestcache"), store.clone()).unwrap(),
    );
    let trees = stowage_treestore::Store::new(
        dir.path().join("treestore"),
        store.clone(),
        cache.clone(),
    )
    .unwrap();
    Fixture {
        dir,
        store,
        cache,
        trees,
    }
}

/// Build an archive-format image in memory and write it to the blob store,
/// returning its digest.
pub fn write_aci(store: &BlobStore, manifest: &str, files: &[(&str, &str)]) -> String {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "manifest", manifest.as_bytes())
        .unwrap();

    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, *path, contents.as_bytes())
            .unwrap();
    }

    store
        .write_blob(
            builder.into_inner().unwrap().as_slice(),
            ACI_MEDIA_TYPE,
            &HashMap::new(),
            Algorithm::Sha256,
        )
        .unwrap()
}
