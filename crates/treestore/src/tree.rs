//! The tree store: materialized directory trees for stored images.
//!
//! A tree renders an image and its transitive dependencies under
//! `tree/<id>/`, where the id is derived from the image's flattened
//! dependency closure. Tree metadata lives in an embedded KV database and
//! a per-id advisory lock serializes rendering, checking and removal.

use crate::checksum;
use crate::error::{TreeStoreError, TreeStoreResult};
use crate::info::{self, TreeInfo};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::digest::to_hex;
use stowage_store::datadir::{DEFAULT_PATH_PERM, UmaskGuard, make_dir};
use stowage_store::kvdb::Db;
use stowage_store::lockfile::KeyLock;
use stowage_store::manifest::ImageManifest;
use stowage_store::registry::AciRegistry;
use stowage_store::{AciManifestCache, Store as BlobStore};
use tracing::{debug, info as log_info};
use walkdir::WalkDir;

const TREE_ID_PREFIX: &str = "deps-";
const TREE_CONTENT_PERM: u32 = 0o2700;

/// A store of rendered image trees.
pub struct Store {
    render_dir: PathBuf,
    lock_dir: PathBuf,
    db: Db,
    store: Arc<BlobStore>,
    manifests: Arc<AciManifestCache>,
    registry: AciRegistry,
}

impl Store {
    /// Open (or create) a tree store rooted at `dir`, rendering images
    /// read through the given blob store and manifest cache.
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<BlobStore>,
        manifests: Arc<AciManifestCache>,
    ) -> TreeStoreResult<Self> {
        let dir = dir.into();
        let _umask = UmaskGuard::clear();

        let render_dir = dir.join("tree");
        let lock_dir = dir.join("locks");
        make_dir(&render_dir, TREE_CONTENT_PERM)?;
        make_dir(&lock_dir, TREE_CONTENT_PERM)?;
        make_dir(&dir.join("db"), DEFAULT_PATH_PERM)?;

        let db = Db::open(dir.join("db").join("db"), &[info::BUCKET])?;
        let registry = AciRegistry::new(store.clone(), manifests.clone());

        Ok(Self {
            render_dir,
            lock_dir,
            db,
            store,
            manifests,
            registry,
        })
    }

    /// The path of the tree with the given id. The path is not guaranteed
    /// to exist or be fully rendered; check with [`Store::is_rendered`].
    pub fn get_path(&self, id: &str) -> PathBuf {
        self.render_dir.join(id)
    }

    /// The rootfs path of the tree with the given id.
    pub fn get_rootfs(&self, id: &str) -> PathBuf {
        self.get_path(id).join("rootfs")
    }

    /// The tree info for the given id, if rendered.
    pub fn get_info(&self, id: &str) -> TreeStoreResult<Option<TreeInfo>> {
        let txn = self.db.read()?;
        info::get(&txn, id)
    }

    /// The infos of every tree rendered from one image digest.
    pub fn get_infos_by_image_digest(&self, digest: &str) -> TreeStoreResult<Vec<TreeInfo>> {
        if digest.is_empty() {
            return Err(TreeStoreError::Corrupt("empty digest".to_string()));
        }
        let txn = self.db.read()?;
        info::by_image_digest(&txn, digest)
    }

    /// Whether the tree with the given id is fully rendered.
    pub fn is_rendered(&self, id: &str) -> TreeStoreResult<bool> {
        Ok(self.get_info(id)?.is_some())
    }

    /// Ids of every fully rendered tree.
    pub fn list_ids(&self) -> TreeStoreResult<Vec<String>> {
        let txn = self.db.read()?;
        Ok(info::all(&txn)?.into_iter().map(|i| i.id).collect())
    }

    /// Render the image with the given digest (and its dependencies) if it
    /// is not already fully rendered, returning the tree id.
    pub fn render(&self, digest: &str, rebuild: bool) -> TreeStoreResult<String> {
        let digest = self.store.resolve_digest(digest)?;
        let id = self.calculate_id(&digest)?;

        let _lock = KeyLock::exclusive(&self.lock_dir, &id)?;

        if !rebuild && self.is_rendered(&id)? && self.get_path(&id).exists() {
            return Ok(id);
        }

        // Clear a possible partial tree first: a previous removal or an
        // interrupted render may have left stale files behind.
        self.remove_tree(&id)?;
        self.render_tree(&id, &digest)?;

        Ok(id)
    }

    /// Recompute the tree checksum and compare it to the stored value.
    /// Returns the computed checksum; the tree state is not mutated.
    pub fn check(&self, id: &str) -> TreeStoreResult<String> {
        let _lock = KeyLock::shared(&self.lock_dir, id)?;

        let Some(stored) = self.get_info(id)? else {
            return Err(TreeStoreError::NotRendered(id.to_string()));
        };
        let actual = checksum::compute(&self.get_path(id))?;
        if actual != stored.checksum {
            return Err(TreeStoreError::ChecksumMismatch {
                id: id.to_string(),
                expected: stored.checksum,
                actual,
            });
        }
        Ok(actual)
    }

    /// Remove the rendered tree with the given id.
    pub fn remove(&self, id: &str) -> TreeStoreResult<()> {
        let _lock = KeyLock::exclusive(&self.lock_dir, id)?;
        self.remove_tree(id)?;
        log_info!(id = %id, "removed tree");
        Ok(())
    }

    /// Compute the tree id for an image digest: a hash of the flattened,
    /// top-first dependency digest list. The id changes when the image's
    /// dependencies change even if the top digest does not.
    pub fn calculate_id(&self, digest: &str) -> TreeStoreResult<String> {
        let deps = self.create_dep_list(digest)?;
        Ok(deps_id(&deps))
    }

    /// Flatten the dependency closure of an image, top image first.
    /// Revisited digests are coalesced; the manifest semantics make the
    /// graph a DAG so the walk terminates.
    fn create_dep_list(&self, digest: &str) -> TreeStoreResult<Vec<String>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.walk_deps(digest, &mut out, &mut seen)?;
        Ok(out)
    }

    fn walk_deps(
        &self,
        digest: &str,
        out: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) -> TreeStoreResult<()> {
        if !seen.insert(digest.to_string()) {
            return Ok(());
        }
        out.push(digest.to_string());

        let manifest = self.manifests.get_manifest(digest)?;
        for dep in &manifest.dependencies {
            let dep_digest = match &dep.image_id {
                Some(id) => self.store.resolve_digest(id)?,
                None => self.registry.get_aci(
                    &dep.image_name,
                    &ImageManifest::label_pairs(&dep.labels),
                )?,
            };
            self.walk_deps(&dep_digest, out, seen)?;
        }
        Ok(())
    }

    /// Render the image into `tree/<id>`. The destination must not exist;
    /// remove any leftovers before calling.
    fn render_tree(&self, id: &str, digest: &str) -> TreeStoreResult<()> {
        let tree_path = self.get_path(id);
        if tree_path.exists() {
            return Err(TreeStoreError::AlreadyExists(tree_path));
        }
        fs::create_dir_all(&tree_path)?;
        fs::set_permissions(&tree_path, Permissions::from_mode(0o755))?;

        // Extract deepest dependencies first so nearer layers overwrite;
        // the top image lands last and provides the manifest sentinel.
        let deps = self.create_dep_list(digest)?;
        for dep in deps.iter().rev() {
            self.extract_image(dep, &tree_path)?;
            debug!(id = %id, digest = %dep, "extracted layer");
        }

        let checksum = checksum::compute(&tree_path)?;
        sync_tree(&tree_path)?;
        let size = tree_size(&tree_path)?;

        let tree_info = TreeInfo {
            id: id.to_string(),
            image_digest: digest.to_string(),
            checksum,
            size,
        };
        let txn = self.db.write()?;
        info::write(&txn, &tree_info)?;
        txn.commit()?;

        log_info!(id = %id, digest = %digest, size, "rendered tree");
        Ok(())
    }

    fn extract_image(&self, digest: &str, dest: &Path) -> TreeStoreResult<()> {
        let reader = self.store.read_blob(digest)?;
        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);
        archive.set_unpack_xattrs(true);
        archive.set_overwrite(true);
        for entry in archive.entries()? {
            let mut entry = entry?;
            entry.unpack_in(dest)?;
        }
        Ok(())
    }

    /// Remove the tree info and then the directory for the given id.
    fn remove_tree(&self, id: &str) -> TreeStoreResult<()> {
        let txn = self.db.write()?;
        info::remove(&txn, id)?;
        txn.commit()?;

        let tree_path = self.get_path(id);
        if tree_path.exists() {
            fs::remove_dir_all(&tree_path)?;
        }
        Ok(())
    }
}

/// The tree id for a flattened dependency digest list.
pub fn deps_id(digests: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digests.join(",").as_bytes());
    format!("{TREE_ID_PREFIX}{}", to_hex(&hasher.finalize()))
}

/// Fsync every file and directory under the tree so the rendered bytes are
/// durable before tree info is committed.
fn sync_tree(tree_path: &Path) -> TreeStoreResult<()> {
    for entry in WalkDir::new(tree_path) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_file() {
            File::open(entry.path())?.sync_all()?;
        }
    }
    Ok(())
}

/// Total size in bytes of the files under the tree.
fn tree_size(tree_path: &Path) -> TreeStoreResult<u64> {
    let mut size = 0;
    for entry in WalkDir::new(tree_path) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            size += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(size)
}
