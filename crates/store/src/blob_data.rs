//! Typed auxiliary data attached to blobs.
//!
//! Rows are keyed by `(digest, dataType)`: JSON at
//! `digest/<digest>/<dataType>` with an empty-valued secondary index at
//! `datatype/<dataType>/<digest>`. The payload is opaque to the store.

use crate::error::{StoreError, StoreResult};
use crate::kvdb::Bucket;
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

pub(crate) const BUCKET: Bucket = TableDefinition::new("blobdata");

/// Auxiliary bytes associated with a blob, keyed by data type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobData {
    pub digest: String,
    pub data_type: String,
    pub data: Vec<u8>,
}

fn digest_key(digest: &str, data_type: &str) -> String {
    debug_assert!(!digest.contains('/'), "bad key value {digest:?}");
    debug_assert!(!data_type.contains('/'), "bad key value {data_type:?}");
    format!("digest/{digest}/{data_type}")
}

fn data_type_key(data_type: &str, digest: &str) -> String {
    debug_assert!(!digest.contains('/'), "bad key value {digest:?}");
    debug_assert!(!data_type.contains('/'), "bad key value {data_type:?}");
    format!("datatype/{data_type}/{digest}")
}

fn decode(bytes: &[u8]) -> StoreResult<BlobData> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn get_in(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    digest: &str,
    data_type: &str,
) -> StoreResult<Option<BlobData>> {
    match table.get(digest_key(digest, data_type).as_str())? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get(
    txn: &ReadTransaction,
    digest: &str,
    data_type: &str,
) -> StoreResult<Option<BlobData>> {
    let table = txn.open_table(BUCKET)?;
    get_in(&table, digest, data_type)
}

/// Write (or overwrite in place) a blob data row and its index entry.
pub(crate) fn write(txn: &WriteTransaction, data: &BlobData) -> StoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;
    let json = serde_json::to_vec(data)?;
    table.insert(digest_key(&data.digest, &data.data_type).as_str(), json.as_slice())?;
    table.insert(
        data_type_key(&data.data_type, &data.digest).as_str(),
        b"".as_slice(),
    )?;
    Ok(())
}

/// All data rows of one data type, via the secondary index.
pub(crate) fn by_data_type(txn: &ReadTransaction, data_type: &str) -> StoreResult<Vec<BlobData>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = data_type_key(data_type, "");
    let mut rows = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, _) = item?;
        let key = k.value();
        if !key.starts_with(prefix.as_str()) {
            break;
        }
        let digest = key.rsplit('/').next().unwrap_or_default().to_string();
        match get_in(&table, &digest, data_type)? {
            Some(row) => rows.push(row),
            None => {
                return Err(StoreError::Corrupt(format!(
                    "data-type index entry without blob data: {key}"
                )));
            }
        }
    }
    Ok(rows)
}

/// Remove every data row for a digest along with the index entries.
pub(crate) fn remove_all(txn: &WriteTransaction, digest: &str) -> StoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;
    let prefix = format!("digest/{digest}/");

    let mut data_types = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, _) = item?;
        let key = k.value();
        if !key.starts_with(prefix.as_str()) {
            break;
        }
        data_types.push(key.rsplit('/').next().unwrap_or_default().to_string());
    }

    for data_type in data_types {
        table.remove(digest_key(digest, &data_type).as_str())?;
        table.remove(data_type_key(&data_type, digest).as_str())?;
    }
    Ok(())
}
