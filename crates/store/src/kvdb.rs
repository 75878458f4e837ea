//! Thin wrapper around the embedded key-value database.
//!
//! Each logical database is a single redb file holding one table per
//! bucket. Primary rows are JSON-encoded records; secondary index rows
//! hold empty values and are scanned by key prefix.

use crate::error::StoreResult;
use redb::{Database, ReadTransaction, TableDefinition, WriteTransaction};
use std::fs;
use std::path::Path;

/// A bucket definition: string keys, opaque byte values.
pub type Bucket = TableDefinition<'static, &'static str, &'static [u8]>;

/// A single-file transactional key-value database.
pub struct Db {
    inner: Database,
}

impl Db {
    /// Open (or create) the database file and ensure the given buckets
    /// exist, so later read transactions never observe a missing table.
    pub fn open(path: impl AsRef<Path>, buckets: &[Bucket]) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let inner = Database::create(path)?;
        let txn = inner.begin_write()?;
        for bucket in buckets {
            txn.open_table(*bucket)?;
        }
        txn.commit()?;
        Ok(Self { inner })
    }

    /// Begin a read-only transaction.
    pub fn read(&self) -> StoreResult<ReadTransaction> {
        Ok(self.inner.begin_read()?)
    }

    /// Begin a write transaction. Dropping it without committing aborts.
    pub fn write(&self) -> StoreResult<WriteTransaction> {
        Ok(self.inner.begin_write()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::ReadableTable;

    const TEST: Bucket = TableDefinition::new("test");

    #[test]
    fn test_open_creates_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("db"), &[TEST]).unwrap();

        // A fresh read transaction can open the bucket.
        let txn = db.read().unwrap();
        let table = txn.open_table(TEST).unwrap();
        assert!(table.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_aborted_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("db"), &[TEST]).unwrap();

        {
            let txn = db.write().unwrap();
            {
                let mut table = txn.open_table(TEST).unwrap();
                table.insert("key", b"value".as_slice()).unwrap();
            }
            // Dropped without commit.
        }

        let txn = db.read().unwrap();
        let table = txn.open_table(TEST).unwrap();
        assert!(table.get("key").unwrap().is_none());
    }

    #[test]
    fn test_prefix_range_scan() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("db"), &[TEST]).unwrap();

        let txn = db.write().unwrap();
        {
            let mut table = txn.open_table(TEST).unwrap();
            table.insert("digest/aaa", b"1".as_slice()).unwrap();
            table.insert("digest/aab", b"2".as_slice()).unwrap();
            table.insert("digest/abc", b"3".as_slice()).unwrap();
            table.insert("other/aaa", b"4".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let txn = db.read().unwrap();
        let table = txn.open_table(TEST).unwrap();
        let mut found = Vec::new();
        for item in table.range("digest/aa"..).unwrap() {
            let (k, _) = item.unwrap();
            if !k.value().starts_with("digest/aa") {
                break;
            }
            found.push(k.value().to_string());
        }
        assert_eq!(found, vec!["digest/aaa", "digest/aab"]);
    }
}
