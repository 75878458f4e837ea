//! Named refs: canonical distribution URIs pointing at blob digests.
//!
//! Primary rows are JSON keyed by `id/<id>`; an empty-valued secondary
//! index `digest/<digest>/<query-escaped id>` supports reverse lookup.
//! Writing a ref that previously pointed at another digest drops the old
//! index entry in the same transaction, so reverse lookups always reflect
//! the latest pointers.

use crate::error::{StoreError, StoreResult};
use crate::kvdb::Bucket;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use stowage_core::distribution::{query_escape, query_unescape};

pub(crate) const BUCKET: Bucket = TableDefinition::new("ref");

/// A named pointer from a distribution URI to a blob digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Canonical distribution URI.
    pub id: String,
    /// Digest of the referenced blob.
    pub digest: String,
}

fn id_key(id: &str) -> String {
    format!("id/{id}")
}

fn digest_id_key(digest: &str, id: &str) -> String {
    debug_assert!(!digest.contains('/'), "bad key value {digest:?}");
    format!("digest/{digest}/{}", query_escape(id))
}

fn decode(bytes: &[u8]) -> StoreResult<Ref> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn get_in(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> StoreResult<Option<Ref>> {
    match table.get(id_key(id).as_str())? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get(txn: &ReadTransaction, id: &str) -> StoreResult<Option<Ref>> {
    let table = txn.open_table(BUCKET)?;
    get_in(&table, id)
}

/// Write the ref row and its digest index entry.
pub(crate) fn write(txn: &WriteTransaction, r: &Ref) -> StoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;

    // Drop the stale reverse-index entry when repointing an existing ref.
    if let Some(previous) = get_in(&table, &r.id)? {
        if previous.digest != r.digest {
            table.remove(digest_id_key(&previous.digest, &r.id).as_str())?;
        }
    }

    let json = serde_json::to_vec(r)?;
    table.insert(id_key(&r.id).as_str(), json.as_slice())?;
    table.insert(digest_id_key(&r.digest, &r.id).as_str(), b"".as_slice())?;
    Ok(())
}

pub(crate) fn all(txn: &ReadTransaction) -> StoreResult<Vec<Ref>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = id_key("");
    let mut refs = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, v) = item?;
        if !k.value().starts_with(prefix.as_str()) {
            break;
        }
        refs.push(decode(v.value())?);
    }
    Ok(refs)
}

pub(crate) fn by_digest_in(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    digest: &str,
) -> StoreResult<Vec<Ref>> {
    let prefix = digest_id_key(digest, "");
    let mut refs = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, _) = item?;
        let key = k.value();
        if !key.starts_with(prefix.as_str()) {
            break;
        }
        let escaped = key.rsplit('/').next().unwrap_or_default();
        let id = query_unescape(escaped)
            .ok_or_else(|| StoreError::Corrupt(format!("bad ref index key: {key}")))?;
        match get_in(table, &id)? {
            Some(r) => refs.push(r),
            None => {
                return Err(StoreError::Corrupt(format!(
                    "digest index entry without ref: {key}"
                )));
            }
        }
    }
    Ok(refs)
}

pub(crate) fn by_digest(txn: &ReadTransaction, digest: &str) -> StoreResult<Vec<Ref>> {
    let table = txn.open_table(BUCKET)?;
    by_digest_in(&table, digest)
}

/// Remove a ref and its index entry. Removing a missing ref is a no-op.
pub(crate) fn remove(txn: &WriteTransaction, id: &str) -> StoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;
    let Some(r) = get_in(&table, id)? else {
        return Ok(());
    };
    table.remove(id_key(id).as_str())?;
    table.remove(digest_id_key(&r.digest, id).as_str())?;
    Ok(())
}
