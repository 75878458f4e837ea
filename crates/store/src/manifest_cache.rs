//! Manifest extraction and memoization for archive-format blobs.
//!
//! The manifest of an archive-format image is the single file named
//! `manifest` in the outermost TAR stream. Extracted manifests are cached
//! on disk under `<dir>/cache/` with the same sharded layout as the blob
//! store, keyed by the blob digest.

use crate::datadir::{DEFAULT_FILE_PERM, DEFAULT_PATH_PERM, UmaskGuard, make_dir};
use crate::error::{StoreError, StoreResult};
use crate::manifest::ImageManifest;
use crate::store::Store;
use std::fs::{self, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::digest::shard_dirs;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MANIFEST_NAME: &str = "manifest";

/// A disk-backed cache of manifests extracted from archive blobs.
pub struct AciManifestCache {
    dir: PathBuf,
    store: Arc<Store>,
}

impl AciManifestCache {
    /// Create a cache rooted at `dir`, reading blobs through `store`.
    pub fn new(dir: impl Into<PathBuf>, store: Arc<Store>) -> StoreResult<Self> {
        let dir = dir.into();
        let _umask = UmaskGuard::clear();
        make_dir(&dir.join("cache"), DEFAULT_PATH_PERM)?;
        Ok(Self { dir, store })
    }

    fn cache_path(&self, digest: &str) -> StoreResult<PathBuf> {
        let (first, second) = shard_dirs(digest)?;
        Ok(self.dir.join("cache").join(first).join(second).join(digest))
    }

    /// The raw manifest bytes for the blob with the given digest.
    ///
    /// A cached entry that no longer decodes is evicted and the blob is
    /// re-extracted once; a second decode failure fails the call.
    pub fn get_manifest_json(&self, digest: &str) -> StoreResult<Vec<u8>> {
        let digest = self.store.resolve_digest(digest)?;
        let path = self.cache_path(&digest)?;

        if path.exists() {
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<ImageManifest>(&bytes) {
                Ok(_) => return Ok(bytes),
                Err(e) => {
                    warn!(digest = %digest, error = %e, "evicting undecodable cached manifest");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let reader = self.store.read_blob(&digest)?;
        let bytes = manifest_from_image(reader, &digest)?;
        serde_json::from_slice::<ImageManifest>(&bytes).map_err(|e| StoreError::ManifestParse {
            digest: digest.clone(),
            source: e,
        })?;

        self.write_cache(&path, &digest, &bytes)?;
        debug!(digest = %digest, size = bytes.len(), "cached manifest");
        Ok(bytes)
    }

    /// The parsed manifest for the blob with the given digest.
    pub fn get_manifest(&self, digest: &str) -> StoreResult<ImageManifest> {
        let digest = self.store.resolve_digest(digest)?;
        let bytes = self.get_manifest_json(&digest)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::ManifestParse { digest, source: e })
    }

    /// Drop cache entries whose digest no longer exists in the blob store.
    pub fn gc(&self) -> StoreResult<()> {
        for entry in WalkDir::new(self.dir.join("cache")) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let digest = entry.file_name().to_string_lossy().into_owned();
            if !self.store.has_blob(&digest).unwrap_or(false) {
                debug!(digest = %digest, "dropping manifest cache entry for removed blob");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn write_cache(&self, path: &Path, digest: &str, bytes: &[u8]) -> StoreResult<()> {
        let _umask = UmaskGuard::clear();
        let (first, second) = shard_dirs(digest)?;
        let shard = self.dir.join("cache").join(first);
        make_dir(&shard, DEFAULT_PATH_PERM)?;
        let parent = shard.join(second);
        make_dir(&parent, DEFAULT_PATH_PERM)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        fs::set_permissions(path, Permissions::from_mode(DEFAULT_FILE_PERM))?;
        Ok(())
    }
}

/// Extract the `manifest` entry from the outermost TAR stream of an image.
fn manifest_from_image(r: impl Read, digest: &str) -> StoreResult<Vec<u8>> {
    let mut archive = tar::Archive::new(r);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let name = path.strip_prefix(".").unwrap_or(path.as_path());
        if name == Path::new(MANIFEST_NAME) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return Ok(bytes);
        }
    }
    Err(StoreError::MissingManifest(digest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_image() {
        let mut builder = tar::Builder::new(Vec::new());
        let manifest = br#"{"name": "example.com/app"}"#;

        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "manifest", manifest.as_slice())
            .unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "rootfs/hello.txt", b"hello".as_slice())
            .unwrap();

        let bytes = builder.into_inner().unwrap();
        let extracted = manifest_from_image(bytes.as_slice(), "sha256-test").unwrap();
        assert_eq!(extracted, manifest);
    }

    #[test]
    fn test_manifest_missing() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "rootfs/hello.txt", b"hello".as_slice())
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let err = manifest_from_image(bytes.as_slice(), "sha256-test").unwrap_err();
        assert!(matches!(err, StoreError::MissingManifest(_)));
    }
}
