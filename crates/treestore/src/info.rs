//! Tree info records and their index keys.
//!
//! Primary rows are JSON keyed by `id/<id>`; an empty-valued secondary
//! index `image/<imageDigest>/<id>` supports lookup of every tree rendered
//! from one image digest.

use crate::error::{TreeStoreError, TreeStoreResult};
use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use stowage_store::kvdb::Bucket;

pub(crate) const BUCKET: Bucket = TableDefinition::new("info");

/// Metadata of a rendered tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeInfo {
    /// Tree id, derived from the image's dependency closure.
    pub id: String,
    /// Digest of the top image the tree renders.
    pub image_digest: String,
    /// Deterministic checksum of the rendered tree.
    pub checksum: String,
    /// Total size in bytes of the rendered tree.
    pub size: u64,
}

fn id_key(id: &str) -> String {
    debug_assert!(!id.contains('/'), "bad key value {id:?}");
    format!("id/{id}")
}

fn image_key(image_digest: &str, id: &str) -> String {
    debug_assert!(!image_digest.contains('/'), "bad key value {image_digest:?}");
    debug_assert!(!id.contains('/'), "bad key value {id:?}");
    format!("image/{image_digest}/{id}")
}

fn decode(bytes: &[u8]) -> TreeStoreResult<TreeInfo> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn get_in(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> TreeStoreResult<Option<TreeInfo>> {
    match table.get(id_key(id).as_str())? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn get(txn: &ReadTransaction, id: &str) -> TreeStoreResult<Option<TreeInfo>> {
    let table = txn.open_table(BUCKET)?;
    get_in(&table, id)
}

/// Write the info row and its image index entry.
pub(crate) fn write(txn: &WriteTransaction, info: &TreeInfo) -> TreeStoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;
    let json = serde_json::to_vec(info)?;
    table.insert(id_key(&info.id).as_str(), json.as_slice())?;
    table.insert(
        image_key(&info.image_digest, &info.id).as_str(),
        b"".as_slice(),
    )?;
    Ok(())
}

pub(crate) fn all(txn: &ReadTransaction) -> TreeStoreResult<Vec<TreeInfo>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = id_key("");
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

/// Infos of every tree rendered from one image digest.
pub(crate) fn by_image_digest(
    txn: &ReadTransaction,
    image_digest: &str,
) -> TreeStoreResult<Vec<TreeInfo>> {
    let table = txn.open_table(BUCKET)?;
    let prefix = image_key(image_digest, "");
    let mut infos = Vec::new();
    for item in table.range(prefix.as_str()..)? {
        let (k, _) = item?;
        let key = k.value();
        if !key.starts_with(prefix.as_str()) {
            break;
        }
        let id = key.rsplit('/').next().unwrap_or_default().to_string();
        match get_in(&table, &id)? {
            Some(info) => infos.push(info),
            None => {
                return Err(TreeStoreError::Corrupt(format!(
                    "image index entry without tree info: {key}"
                )));
            }
        }
    }
    Ok(infos)
}

/// Remove the info row and its index entry. Missing rows are a no-op.
pub(crate) fn remove(txn: &WriteTransaction, id: &str) -> TreeStoreResult<()> {
    let mut table = txn.open_table(BUCKET)?;
    let Some(info) = get_in(&table, id)? else {
        return Ok(());
    };
    table.remove(id_key(id).as_str())?;
    table.remove(image_key(&info.image_digest, id).as_str())?;
    Ok(())
}
