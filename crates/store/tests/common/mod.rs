//! Common test fixtures.
#![allow(dead_code)]

use std::path::Path;
use stowage_store::Store;

/// Open a store under a fresh temp directory, returning both.
pub fn new_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("casref")).unwrap();
    (dir, store)
}

/// Build an archive-format image in memory: a `manifest` entry followed by
/// `rootfs/` files.
pub fn build_aci(manifest: &str, files: &[(&str, &str)]) -> Vec<u8> {
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

    builder.into_inner().unwrap()
}

/// The on-disk path of a blob, following the sharded layout.
pub fn blob_path(store_dir: &Path, digest: &str) -> std::path::PathBuf {
    let hex = digest.split_once('-').unwrap().1;
    store_dir
        .join("blob")
        .join(&hex[0..3])
        .join(&hex[3..6])
        .join(digest)
}
