//! Blob and ref store integration tests.

mod common;

use common::{blob_path, new_store};
use proptest::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use stowage_core::Algorithm;
use stowage_store::StoreError;

const HELLO_DIGEST: &str =
    "sha256-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn write_bytes(store: &stowage_store::Store, bytes: &[u8]) -> String {
    store
        .write_blob(bytes, "text/plain", &HashMap::new(), Algorithm::Sha256)
        .unwrap()
}

#[test]
fn test_write_blob_known_digest() {
    let (_dir, store) = new_store();
    let digest = write_bytes(&store, b"hello");
    assert_eq!(digest, HELLO_DIGEST);
    assert!(store.has_blob(&digest).unwrap());

    let info = store.get_blob_info(&digest).unwrap().unwrap();
    assert_eq!(info.media_type, "text/plain");
    assert_eq!(info.size, 5);
}

#[test]
fn test_read_blob_by_partial_digest() {
    let (_dir, store) = new_store();
    write_bytes(&store, b"hello");

    let mut reader = store.read_blob("sha256-2cf2").unwrap();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).unwrap();
    assert_eq!(contents, b"hello");
}

#[test]
fn test_read_blob_verifies_digest_roundtrip() {
    let (_dir, store) = new_store();
    let digest = write_bytes(&store, b"some image bytes");

    let mut reader = store.read_blob(&digest).unwrap();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).unwrap();

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let recomputed: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    assert_eq!(format!("sha256-{recomputed}"), digest);
}

#[test]
fn test_resolve_digest_too_short() {
    let (_dir, store) = new_store();
    write_bytes(&store, b"hello");

    assert!(matches!(
        store.resolve_digest("sha256-2"),
        Err(StoreError::DigestTooShort(_))
    ));
    // One nibble pair is the minimum.
    assert_eq!(store.resolve_digest("sha256-2c").unwrap(), HELLO_DIGEST);
}

#[test]
fn test_resolve_digest_not_found() {
    let (_dir, store) = new_store();
    write_bytes(&store, b"hello");

    assert!(matches!(
        store.resolve_digest("sha256-00"),
        Err(StoreError::DigestNotFound(_))
    ));
    assert!(matches!(
        store.resolve_digest("not a digest"),
        Err(StoreError::Core(_))
    ));
}

#[test]
fn test_resolve_digest_ambiguous() {
    let (_dir, store) = new_store();

    // Find two contents whose digests share their first nibble pair.
    let mut by_prefix: HashMap<String, (String, String)> = HashMap::new();
    let (first, second, shared) = (0..4096)
        .find_map(|i| {
            let contents = format!("blob-{i}");
            let mut hasher = Sha256::new();
            hasher.update(contents.as_bytes());
            let hex: String = hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            let prefix = hex[0..2].to_string();
            if let Some((other, _)) = by_prefix.get(&prefix) {
                return Some((other.clone(), contents, prefix));
            }
            by_prefix.insert(prefix, (contents, hex));
            None
        })
        .expect("no colliding nibble pair in 4096 attempts");

    let d1 = write_bytes(&store, first.as_bytes());
    let d2 = write_bytes(&store, second.as_bytes());
    assert_ne!(d1, d2);

    assert!(matches!(
        store.resolve_digest(&format!("sha256-{shared}")),
        Err(StoreError::AmbiguousDigest(_))
    ));

    // Past the common prefix each digest resolves unambiguously.
    let unique = &d1[..d1.len().min("sha256-".len() + 8)];
    assert_eq!(store.resolve_digest(unique).unwrap(), d1);
}

#[test]
fn test_blob_data_lifecycle() {
    let (_dir, store) = new_store();
    let mut extra = HashMap::new();
    extra.insert("aciinfo".to_string(), b"aci metadata".to_vec());
    let digest = store
        .write_blob(&b"hello"[..], "text/plain", &extra, Algorithm::Sha256)
        .unwrap();

    assert_eq!(
        store.read_blob_data(&digest, "aciinfo").unwrap(),
        Some(b"aci metadata".to_vec())
    );
    assert_eq!(store.read_blob_data(&digest, "imageinfo").unwrap(), None);

    // Overwrite in place.
    store
        .write_blob_data(&digest, "aciinfo", b"updated".to_vec())
        .unwrap();
    assert_eq!(
        store.read_blob_data(&digest, "aciinfo").unwrap(),
        Some(b"updated".to_vec())
    );

    let rows = store.get_blob_data_by_data_type("aciinfo").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].digest, digest);

    assert!(matches!(
        store.write_blob_data("sha256-0000", "aciinfo", Vec::new()),
        Err(StoreError::DigestNotFound(_))
    ));
}

#[test]
fn test_ref_lifecycle() {
    let (_dir, store) = new_store();
    let digest = write_bytes(&store, b"hello");

    let id = "cimd:appc:v=0:ex.com/a";
    store.set_ref(id, &digest).unwrap();
    assert_eq!(store.get_ref(id).unwrap(), digest);

    // Removal is blocked while referenced, and leaves everything intact.
    assert!(matches!(
        store.remove_blob(&digest, false),
        Err(StoreError::Referenced(_))
    ));
    assert!(store.has_blob(&digest).unwrap());
    assert_eq!(store.get_ref(id).unwrap(), digest);

    // Forced removal drops the refs with the blob.
    store.remove_blob(&digest, true).unwrap();
    assert!(matches!(
        store.get_ref(id),
        Err(StoreError::RefNotFound(_))
    ));
    assert!(!store.has_blob(&digest).unwrap());
    assert!(store.get_refs_by_digest(&digest).unwrap().is_empty());
}

#[test]
fn test_forced_removal_leaves_nothing() {
    let (dir, store) = new_store();
    let mut extra = HashMap::new();
    extra.insert("aciinfo".to_string(), b"x".to_vec());
    let digest = store
        .write_blob(&b"hello"[..], "text/plain", &extra, Algorithm::Sha256)
        .unwrap();
    store.set_ref("cimd:appc:v=0:ex.com/a", &digest).unwrap();
    store.set_ref("cimd:appc:v=0:ex.com/b", &digest).unwrap();

    store.remove_blob(&digest, true).unwrap();

    assert!(!store.has_blob(&digest).unwrap());
    assert!(store.get_all_refs().unwrap().is_empty());
    assert!(store.get_blob_data_by_data_type("aciinfo").unwrap().is_empty());
    assert!(!blob_path(&dir.path().join("casref"), &digest).exists());

    // Blob data reads fail once the blob is gone.
    assert!(matches!(
        store.read_blob_data(&digest, "aciinfo"),
        Err(StoreError::DigestNotFound(_))
    ));
}

#[test]
fn test_set_ref_requires_blob() {
    let (_dir, store) = new_store();
    write_bytes(&store, b"hello");
    assert!(matches!(
        store.set_ref("cimd:appc:v=0:ex.com/a", "sha256-00"),
        Err(StoreError::DigestNotFound(_))
    ));
}

#[test]
fn test_refs_track_latest_digest() {
    let (_dir, store) = new_store();
    let d1 = write_bytes(&store, b"one");
    let d2 = write_bytes(&store, b"two");

    let id = "cimd:appc:v=0:ex.com/app";
    store.set_ref(id, &d1).unwrap();
    store.set_ref(id, &d2).unwrap();

    assert_eq!(store.get_ref(id).unwrap(), d2);
    assert!(store.get_refs_by_digest(&d1).unwrap().is_empty());
    let refs = store.get_refs_by_digest(&d2).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].id, id);

    // d1 is now unreferenced and removable without force.
    store.remove_blob(&d1, false).unwrap();
}

#[test]
fn test_multiple_refs_per_digest() {
    let (_dir, store) = new_store();
    let digest = write_bytes(&store, b"hello");

    store.set_ref("cimd:appc:v=0:ex.com/a", &digest).unwrap();
    store
        .set_ref("cimd:docker:v=0:registry-1.docker.io/library/a:latest", &digest)
        .unwrap();

    let mut ids: Vec<String> = store
        .get_refs_by_digest(&digest)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "cimd:appc:v=0:ex.com/a".to_string(),
            "cimd:docker:v=0:registry-1.docker.io/library/a:latest".to_string(),
        ]
    );

    store.remove_ref("cimd:appc:v=0:ex.com/a").unwrap();
    assert_eq!(store.get_refs_by_digest(&digest).unwrap().len(), 1);
    // Removing a missing ref is a no-op.
    store.remove_ref("cimd:appc:v=0:ex.com/a").unwrap();
}

#[test]
fn test_remove_blob_stale_data() {
    let (dir, store) = new_store();
    let digest = write_bytes(&store, b"hello");

    // Simulate a file that went missing outside the store's control.
    std::fs::remove_file(blob_path(&dir.path().join("casref"), &digest)).unwrap();

    assert!(matches!(
        store.remove_blob(&digest, false),
        Err(StoreError::StaleData(_))
    ));
    // The blob is logically removed regardless.
    assert!(!store.has_blob(&digest).unwrap());
}

#[test]
fn test_media_type_index() {
    let (_dir, store) = new_store();
    let d1 = store
        .write_blob(
            &b"aci bytes"[..],
            "application/vnd.appc.aci",
            &HashMap::new(),
            Algorithm::Sha256,
        )
        .unwrap();
    write_bytes(&store, b"plain bytes");

    let infos = store
        .get_blob_infos_by_media_type("application/vnd.appc.aci")
        .unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].digest, d1);

    assert_eq!(store.get_all_blob_infos().unwrap().len(), 2);

    store.remove_blob(&d1, false).unwrap();
    assert!(
        store
            .get_blob_infos_by_media_type("application/vnd.appc.aci")
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_rewrite_updates_media_type_index() {
    let (_dir, store) = new_store();
    let d1 = write_bytes(&store, b"hello");
    let d2 = store
        .write_blob(
            &b"hello"[..],
            "application/vnd.appc.aci",
            &HashMap::new(),
            Algorithm::Sha256,
        )
        .unwrap();
    assert_eq!(d1, d2);

    assert!(
        store
            .get_blob_infos_by_media_type("text/plain")
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        store
            .get_blob_infos_by_media_type("application/vnd.appc.aci")
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_sha512_blobs() {
    let (_dir, store) = new_store();
    let digest = store
        .write_blob(&b"hello"[..], "text/plain", &HashMap::new(), Algorithm::Sha512)
        .unwrap();
    assert!(digest.starts_with("sha512-"));
    assert_eq!(digest.len(), "sha512-".len() + 128);

    let mut contents = Vec::new();
    store
        .read_blob(&digest)
        .unwrap()
        .read_to_end(&mut contents)
        .unwrap();
    assert_eq!(contents, b"hello");
}

#[test]
fn test_store_opens_in_bootstrapped_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    stowage_store::datadir::setup(&data_dir).unwrap();

    let store = stowage_store::Store::new(data_dir.join("casref")).unwrap();
    let digest = write_bytes(&store, b"hello");
    assert!(store.has_blob(&digest).unwrap());
    assert!(blob_path(&data_dir.join("casref"), &digest).is_file());
}

#[test]
fn test_store_reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let digest = {
        let store = stowage_store::Store::new(dir.path().join("casref")).unwrap();
        let d = write_bytes(&store, b"persistent");
        store.set_ref("cimd:appc:v=0:ex.com/app", &d).unwrap();
        d
    };

    let store = stowage_store::Store::new(dir.path().join("casref")).unwrap();
    assert!(store.has_blob(&digest).unwrap());
    assert_eq!(store.get_ref("cimd:appc:v=0:ex.com/app").unwrap(), digest);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    // Any query strictly longer than a digest's longest common prefix with
    // the other committed digests resolves to that digest alone.
    #[test]
    fn prop_partial_digest_resolution(
        contents in proptest::collection::hash_set("[a-z]{1,12}", 2..8),
    ) {
        let (_dir, store) = new_store();
        let digests: Vec<String> = contents
            .iter()
            .map(|c| write_bytes(&store, c.as_bytes()))
            .collect();

        for digest in &digests {
            let hex = &digest["sha256-".len()..];
            let max_lcp = digests
                .iter()
                .filter(|d| *d != digest)
                .map(|d| {
                    let other = &d["sha256-".len()..];
                    hex.chars()
                        .zip(other.chars())
                        .take_while(|(a, b)| a == b)
                        .count()
                })
                .max()
                .unwrap_or(0);

            // Past the longest shared prefix the query is unambiguous.
            let unique_len = (max_lcp + 1).max(2);
            let query = format!("sha256-{}", &hex[..unique_len]);
            prop_assert_eq!(&store.resolve_digest(&query).unwrap(), digest);

            // At or below a shared prefix of at least one nibble pair the
            // query is ambiguous.
            if max_lcp >= 2 {
                let query = format!("sha256-{}", &hex[..max_lcp]);
                prop_assert!(matches!(
                    store.resolve_digest(&query),
                    Err(StoreError::AmbiguousDigest(_))
                ));
            }
        }
    }

    // Every committed blob reads back as bytes whose recomputed digest
    // matches the returned one.
    #[test]
    fn prop_write_read_digest_roundtrip(
        contents in proptest::collection::vec(any::<u8>(), 0..16384),
    ) {
        let (_dir, store) = new_store();
        let digest = store
            .write_blob(contents.as_slice(), "application/octet-stream", &HashMap::new(), Algorithm::Sha256)
            .unwrap();

        let mut read_back = Vec::new();
        store.read_blob(&digest).unwrap().read_to_end(&mut read_back).unwrap();
        prop_assert_eq!(&read_back, &contents);

        let mut hasher = Sha256::new();
        hasher.update(&read_back);
        let hex: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        prop_assert_eq!(format!("sha256-{hex}"), digest);
    }
}
