//! The content-addressed blob and ref store.
//!
//! Blob bytes live under `blob/<3hex>/<3hex>/<digest>`; metadata and refs
//! live in two embedded KV databases (`blobdb`, `refdb`). Per-digest
//! advisory file locks under `bloblocks/` coordinate cooperating
//! processes: shared for readers, exclusive for writers and removers.

use crate::blob_data::{self, BlobData};
use crate::blob_info::{self, BlobInfo};
use crate::datadir::{DEFAULT_FILE_PERM, DEFAULT_PATH_PERM, UmaskGuard, make_dir};
use crate::error::{StoreError, StoreResult};
use crate::kvdb::Db;
use crate::lockfile::KeyLock;
use crate::ref_entry::{self, Ref};
use std::collections::HashMap;
use std::fs::{self, File, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use stowage_core::digest::{Algorithm, Digester, parse_digest, shard_dirs};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// A content-addressed store of blobs with a named-ref index overlay.
pub struct Store {
    dir: PathBuf,
    blob_db: Db,
    ref_db: Db,
    blob_lock_dir: PathBuf,
}

impl Store {
    /// Open (or create) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        let _umask = UmaskGuard::clear();

        let blob_lock_dir = dir.join("bloblocks");
        for sub in ["blob", "bloblocks", "tmp", "blobdb", "refdb"] {
            make_dir(&dir.join(sub), DEFAULT_PATH_PERM)?;
        }

        let blob_db = Db::open(
            dir.join("blobdb").join("db"),
            &[blob_info::BUCKET, blob_data::BUCKET],
        )?;
        let ref_db = Db::open(dir.join("refdb").join("db"), &[ref_entry::BUCKET])?;
        for db_file in ["blobdb", "refdb"] {
            fs::set_permissions(
                dir.join(db_file).join("db"),
                Permissions::from_mode(DEFAULT_FILE_PERM),
            )?;
        }

        Ok(Self {
            dir,
            blob_db,
            ref_db,
            blob_lock_dir,
        })
    }

    /// The store root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tmp_dir(&self) -> StoreResult<PathBuf> {
        let dir = self.dir.join("tmp");
        make_dir(&dir, DEFAULT_PATH_PERM)?;
        Ok(dir)
    }

    /// A temporary file on the same filesystem as the store, for callers
    /// staging bytes before `write_blob`.
    pub fn tmp_file(&self) -> StoreResult<NamedTempFile> {
        Ok(NamedTempFile::new_in(self.tmp_dir()?)?)
    }

    fn blob_path(&self, digest: &str) -> StoreResult<PathBuf> {
        let (first, second) = shard_dirs(digest)?;
        Ok(self.dir.join("blob").join(first).join(second).join(digest))
    }

    /// Resolve a possibly partial digest (e.g. `sha256-2cf2`) to the full
    /// digest of a stored blob.
    pub fn resolve_digest(&self, in_digest: &str) -> StoreResult<String> {
        let (digest, algorithm) = parse_digest(in_digest)?;
        // At least one nibble pair after the hyphen.
        if digest.len() < algorithm.prefix_len() + 3 {
            return Err(StoreError::DigestTooShort(in_digest.to_string()));
        }

        let txn = self.blob_db.read()?;
        let infos = blob_info::with_digest_prefix(&txn, &digest)?;
        match infos.len() {
            0 => Err(StoreError::DigestNotFound(digest)),
            1 => Ok(infos.into_iter().next().map(|i| i.digest).unwrap_or(digest)),
            _ => Err(StoreError::AmbiguousDigest(in_digest.to_string())),
        }
    }

    /// Stream bytes into the store, returning the content digest.
    ///
    /// The input is staged to a temporary file on the store filesystem while
    /// the digest is computed, then renamed into place; the blob info row
    /// and any extra data rows are written in a single transaction.
    pub fn write_blob(
        &self,
        mut r: impl Read,
        media_type: &str,
        extra_data: &HashMap<String, Vec<u8>>,
        algorithm: Algorithm,
    ) -> StoreResult<String> {
        let _umask = UmaskGuard::clear();

        let mut digester = Digester::new(algorithm);
        let mut tmp = NamedTempFile::new_in(self.tmp_dir()?)?;
        let mut size: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            size += n as u64;
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        let digest = digester.finalize();
        let _lock = KeyLock::exclusive(&self.blob_lock_dir, &digest)?;

        let path = self.blob_path(&digest)?;
        let (first, second) = shard_dirs(&digest)?;
        let shard = self.dir.join("blob").join(first);
        make_dir(&shard, DEFAULT_PATH_PERM)?;
        make_dir(&shard.join(second), DEFAULT_PATH_PERM)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        fs::set_permissions(&path, Permissions::from_mode(DEFAULT_FILE_PERM))?;

        let now = OffsetDateTime::now_utc();
        let txn = self.blob_db.write()?;
        blob_info::write(
            &txn,
            &BlobInfo {
                digest: digest.clone(),
                media_type: media_type.to_string(),
                size,
                import_time: now,
                last_used: now,
            },
        )?;
        for (data_type, data) in extra_data {
            blob_data::write(
                &txn,
                &BlobData {
                    digest: digest.clone(),
                    data_type: data_type.clone(),
                    data: data.clone(),
                },
            )?;
        }
        txn.commit()?;

        info!(digest = %digest, media_type = %media_type, size, "stored blob");
        Ok(digest)
    }

    /// Open a blob for reading. The returned reader holds a shared lock on
    /// the digest until it is dropped.
    pub fn read_blob(&self, digest: &str) -> StoreResult<BlobReader> {
        let digest = self.resolve_digest(digest)?;
        let lock = KeyLock::shared(&self.blob_lock_dir, &digest)?;

        let txn = self.blob_db.read()?;
        if blob_info::get(&txn, &digest)?.is_none() {
            return Err(StoreError::DigestNotFound(digest));
        }

        let path = self.blob_path(&digest)?;
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::Corrupt(format!("blob file missing for {digest}"))
            } else {
                StoreError::Io(e)
            }
        })?;

        Ok(BlobReader {
            file,
            _lock: lock,
        })
    }

    /// Whether a blob info row exists for the given full digest.
    pub fn has_blob(&self, digest: &str) -> StoreResult<bool> {
        let (digest, _) = parse_digest(digest)?;
        let txn = self.blob_db.read()?;
        Ok(blob_info::get(&txn, &digest)?.is_some())
    }

    /// Attach (or overwrite in place) typed auxiliary data to a blob.
    pub fn write_blob_data(
        &self,
        digest: &str,
        data_type: &str,
        data: Vec<u8>,
    ) -> StoreResult<()> {
        if data_type.is_empty() {
            return Err(StoreError::Corrupt("empty data type".to_string()));
        }
        let digest = self.resolve_digest(digest)?;
        let _lock = KeyLock::exclusive(&self.blob_lock_dir, &digest)?;

        let txn = self.blob_db.write()?;
        {
            let table = txn.open_table(blob_info::BUCKET)?;
            if blob_info::get_in(&table, &digest)?.is_none() {
                return Err(StoreError::DigestNotFound(digest));
            }
        }
        blob_data::write(
            &txn,
            &BlobData {
                digest: digest.clone(),
                data_type: data_type.to_string(),
                data,
            },
        )?;
        txn.commit()?;
        debug!(digest = %digest, data_type = %data_type, "wrote blob data");
        Ok(())
    }

    /// Read typed auxiliary data for a blob. Returns `None` when the blob
    /// exists but carries no data of this type.
    pub fn read_blob_data(&self, digest: &str, data_type: &str) -> StoreResult<Option<Vec<u8>>> {
        let digest = self.resolve_digest(digest)?;
        let _lock = KeyLock::shared(&self.blob_lock_dir, &digest)?;

        let txn = self.blob_db.read()?;
        Ok(blob_data::get(&txn, &digest, data_type)?.map(|d| d.data))
    }

    /// The digest a ref points at.
    pub fn get_ref(&self, id: &str) -> StoreResult<String> {
        let txn = self.ref_db.read()?;
        match ref_entry::get(&txn, id)? {
            Some(r) => Ok(r.digest),
            None => Err(StoreError::RefNotFound(id.to_string())),
        }
    }

    /// Point a ref at a blob digest.
    ///
    /// Only the existence of the referenced blob is checked; it is up to the
    /// caller to ensure every blob an image format requires is in the store.
    /// The exclusive blob lock is held across the check and the insert so a
    /// concurrent removal cannot race it.
    pub fn set_ref(&self, id: &str, digest: &str) -> StoreResult<()> {
        let digest = self.resolve_digest(digest)?;
        let _lock = KeyLock::exclusive(&self.blob_lock_dir, &digest)?;

        if !self.has_blob(&digest)? {
            return Err(StoreError::DigestNotFound(digest));
        }

        let txn = self.ref_db.write()?;
        ref_entry::write(
            &txn,
            &Ref {
                id: id.to_string(),
                digest: digest.clone(),
            },
        )?;
        txn.commit()?;
        debug!(id = %id, digest = %digest, "set ref");
        Ok(())
    }

    /// Remove a ref. Removing a missing ref is a no-op.
    pub fn remove_ref(&self, id: &str) -> StoreResult<()> {
        let txn = self.ref_db.write()?;
        ref_entry::remove(&txn, id)?;
        txn.commit()?;
        debug!(id = %id, "removed ref");
        Ok(())
    }

    /// All refs in the store.
    pub fn get_all_refs(&self) -> StoreResult<Vec<Ref>> {
        let txn = self.ref_db.read()?;
        ref_entry::all(&txn)
    }

    /// The refs currently pointing at a digest.
    pub fn get_refs_by_digest(&self, digest: &str) -> StoreResult<Vec<Ref>> {
        let (digest, _) = parse_digest(digest)?;
        let txn = self.ref_db.read()?;
        ref_entry::by_digest(&txn, &digest)
    }

    /// Remove a blob and all its data.
    ///
    /// Fails with `Referenced` while refs point at the blob unless `force`
    /// is set, in which case the referring refs are removed in the same
    /// transaction. If the database rows are gone but the file unlink
    /// fails, the blob counts as removed and `StaleData` is returned so the
    /// caller can schedule a sweep.
    pub fn remove_blob(&self, digest: &str, force: bool) -> StoreResult<()> {
        let digest = self.resolve_digest(digest)?;
        let _lock = KeyLock::exclusive(&self.blob_lock_dir, &digest)?;

        // Refs first, in their own transaction.
        let txn = self.ref_db.write()?;
        let refs = {
            let table = txn.open_table(ref_entry::BUCKET)?;
            ref_entry::by_digest_in(&table, &digest)?
        };
        if !refs.is_empty() {
            if !force {
                return Err(StoreError::Referenced(digest));
            }
            for r in &refs {
                ref_entry::remove(&txn, &r.id)?;
            }
        }
        txn.commit()?;

        // Then the blob info and data rows.
        let txn = self.blob_db.write()?;
        if !blob_info::remove(&txn, &digest)? {
            return Err(StoreError::DigestNotFound(digest));
        }
        blob_data::remove_all(&txn, &digest)?;
        txn.commit()?;

        // Finally the non-transactional bytes.
        let path = self.blob_path(&digest)?;
        if let Err(e) = fs::remove_file(&path) {
            warn!(digest = %digest, error = %e, "blob removed but file unlink failed");
            return Err(StoreError::StaleData(digest));
        }

        info!(digest = %digest, force, "removed blob");
        Ok(())
    }

    /// Blob info for a full digest, if present.
    pub fn get_blob_info(&self, digest: &str) -> StoreResult<Option<BlobInfo>> {
        let (digest, _) = parse_digest(digest)?;
        let txn = self.blob_db.read()?;
        blob_info::get(&txn, &digest)
    }

    /// All blob infos in the store.
    pub fn get_all_blob_infos(&self) -> StoreResult<Vec<BlobInfo>> {
        let txn = self.blob_db.read()?;
        blob_info::all(&txn)
    }

    /// Blob infos for one media type.
    pub fn get_blob_infos_by_media_type(&self, media_type: &str) -> StoreResult<Vec<BlobInfo>> {
        let txn = self.blob_db.read()?;
        blob_info::by_media_type(&txn, media_type)
    }

    /// All blob data rows of one data type.
    pub fn get_blob_data_by_data_type(&self, data_type: &str) -> StoreResult<Vec<BlobData>> {
        let txn = self.blob_db.read()?;
        blob_data::by_data_type(&txn, data_type)
    }
}

/// A readable blob stream holding a shared per-digest lock until dropped.
pub struct BlobReader {
    file: File,
    _lock: KeyLock,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
