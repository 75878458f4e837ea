//! Blob metadata records and their index keys.
//!
//! Primary rows are JSON keyed by `digest/<digest>`; an empty-valued
//! secondary index `mediatype/<mediaType>/<digest>` supports enumeration
//! by media type. Both are written and deleted in the same transaction.

use crate::error::{StoreError, StoreResult};
use crate::kvdb::Bucket;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) const BUCKET: Bucket = TableDefinition::new("blobinfo");

/// Per-blob metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Blob digest, the primary key.
    pub digest: String,
    /// Media type of the blob contents, opaque to the store.
    pub media_type: String,
    /// Size in bytes of the stored blob.
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub import_time: OffsetDateTime,
    /// For external eviction policies; the store never interprets it.
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

pub(crate) fn digest_key(digest: &str) -> String {
    debug_assert!(!digest.contains('/'), "bad key value {digest:?}");
    format!("digest/{digest}")
}

pub(crate) fn media_type_key(media_type: &str, digest: &str) -> String {
    debug_assert!(!digest.contains('/'), "bad key value {digest:?}");
    format!("mediatype/{media_type}/{digest}")
}

fn decode(bytes: &[u8]) -> StoreResult<BlobInfo> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn get_in(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    digest: &str,
) -> StoreResult<Option<BlobInfo>> {
    match table.get(digest_key(digest).as_str())? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get(txn: &ReadTransaction, digest: &str) -> StoreResult<Option<BlobInfo>> {
    let table = txn.open_table(BUCKET)?;
    get_in(&table, digest)
}

/// Write the blob info row and its media-type index entry.
pub(crate) fn write(txn: &WriteTransaction, info: &BlobInfo) -> StoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;

    // Drop a stale media-type index entry if the row is being replaced.
    if let Some(previous) = get_in(&table, &info.digest)? {
        if previous.media_type != info.media_type {
            table.remove(media_type_key(&previous.media_type, &info.digest).as_str())?;
        }
    }

    let json = serde_json::to_vec(info)?;
    table.insert(digest_key(&info.digest).as_str(), json.as_slice())?;
    table.insert(
        media_type_key(&info.media_type, &info.digest).as_str(),
        b"".as_slice(),
    )?;
    Ok(())
}

/// All blob infos whose digest starts with the given prefix, in key order.
pub(crate) fn with_digest_prefix(
    txn: &ReadTransaction,
    digest_prefix: &str,
) -> StoreResult<Vec<BlobInfo>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = digest_key(digest_prefix);
    let mut infos = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, v) = item?;
        if !k.value().starts_with(prefix.as_str()) {
            break;
        }
        infos.push(decode(v.value())?);
    }
    Ok(infos)
}

pub(crate) fn all(txn: &ReadTransaction) -> StoreResult<Vec<BlobInfo>> {
    with_digest_prefix(txn, "")
}

/// Blob infos for a media type, via the secondary index.
pub(crate) fn by_media_type(txn: &ReadTransaction, media_type: &str) -> StoreResult<Vec<BlobInfo>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = media_type_key(media_type, "");
    let mut infos = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, _) = item?;
        let key = k.value();
        if !key.starts_with(prefix.as_str()) {
            break;
        }
        let digest = key.rsplit('/').next().unwrap_or_default().to_string();
        match get_in(&table, &digest)? {
            Some(info) => infos.push(info),
            None => {
                return Err(StoreError::Corrupt(format!(
                    "media-type index entry without blob info: {key}"
                )));
            }
        }
    }
    Ok(infos)
}

/// Remove the blob info row and its index entry. Returns false if absent.
pub(crate) fn remove(txn: &WriteTransaction, digest: &str) -> StoreResult<bool> {
    let mut table = txn.open_table(BUCKET)?;
    let Some(info) = get_in(&table, digest)? else {
        return Ok(false);
    };
    table.remove(digest_key(digest).as_str())?;
    table.remove(media_type_key(&info.media_type, digest).as_str())?;
    Ok(true)
}
