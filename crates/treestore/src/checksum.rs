//! Deterministic checksum of a rendered tree.
//!
//! The checksum hashes the same information a tar archive of the tree
//! would carry, minus everything that varies between hosts: entries are
//! visited in lexicographic walk order, each contributes a normalized
//! header record (no user/group names, no timestamps, xattrs sorted by
//! name) followed by the file contents for regular files. Hard links to an
//! already-seen inode contribute no bytes, sockets are skipped entirely.

use crate::error::TreeStoreResult;
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use stowage_core::digest::to_hex;
use walkdir::WalkDir;

const MANIFEST_SENTINEL: &str = "manifest";

const TYPE_REGULAR: u8 = b'0';
const TYPE_HARDLINK: u8 = b'1';
const TYPE_SYMLINK: u8 = b'2';
const TYPE_CHAR: u8 = b'3';
const TYPE_BLOCK: u8 = b'4';
const TYPE_DIR: u8 = b'5';
const TYPE_FIFO: u8 = b'6';

/// Normalized per-entry record fed into the hash. Field order is part of
/// the checksum contract.
#[derive(Serialize)]
struct HeaderRecord {
    name: String,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    typeflag: u8,
    linkname: String,
    devmajor: u64,
    devminor: u64,
    xattrs: Vec<Xattr>,
}

#[derive(Serialize)]
struct Xattr {
    name: String,
    value: String,
}

fn read_xattrs(path: &Path) -> Vec<Xattr> {
    let Ok(names) = xattr::list(path) else {
        return Vec::new();
    };
    let mut xattrs: Vec<Xattr> = names
        .filter_map(|name| {
            let value = xattr::get(path, &name).ok().flatten()?;
            Some(Xattr {
                name: name.to_string_lossy().into_owned(),
                value: String::from_utf8_lossy(&value).into_owned(),
            })
        })
        .collect();
    xattrs.sort_by(|a, b| a.name.cmp(&b.name));
    xattrs
}

/// Compute the checksum of the tree rooted at `tree_path`.
pub fn compute(tree_path: &Path) -> TreeStoreResult<String> {
    let mut hasher = Sha256::new();
    // Inode -> first seen path, to account for hard links.
    let mut inodes: HashMap<u64, String> = HashMap::new();

    for entry in WalkDir::new(tree_path).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(tree_path)
            .unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().into_owned();
        if name == MANIFEST_SENTINEL {
            continue;
        }

        let meta = entry.metadata().map_err(io::Error::from)?;
        let file_type = meta.file_type();
        if file_type.is_socket() {
            continue;
        }

        let mut record = HeaderRecord {
            name,
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            size: 0,
            typeflag: TYPE_REGULAR,
            linkname: String::new(),
            devmajor: 0,
            devminor: 0,
            xattrs: Vec::new(),
        };

        let mut contents = false;
        if file_type.is_dir() {
            record.typeflag = TYPE_DIR;
        } else if file_type.is_symlink() {
            record.typeflag = TYPE_SYMLINK;
            record.linkname = fs::read_link(entry.path())?
                .to_string_lossy()
                .into_owned();
        } else if file_type.is_char_device() {
            record.typeflag = TYPE_CHAR;
            record.devmajor = nix::sys::stat::major(meta.rdev());
            record.devminor = nix::sys::stat::minor(meta.rdev());
        } else if file_type.is_block_device() {
            record.typeflag = TYPE_BLOCK;
            record.devmajor = nix::sys::stat::major(meta.rdev());
            record.devminor = nix::sys::stat::minor(meta.rdev());
        } else if file_type.is_fifo() {
            record.typeflag = TYPE_FIFO;
        } else if meta.nlink() > 1 {
            match inodes.get(&meta.ino()) {
                Some(first) => {
                    // A hard link to a seen inode carries no contents.
                    record.typeflag = TYPE_HARDLINK;
                    record.linkname = first.clone();
                }
                None => {
                    inodes.insert(meta.ino(), record.name.clone());
                    record.size = meta.len();
                    contents = true;
                }
            }
        } else {
            record.size = meta.len();
            contents = true;
        }

        if !file_type.is_symlink() {
            record.xattrs = read_xattrs(entry.path());
        }

        hasher.update(serde_json::to_vec(&record)?);
        if contents {
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut hasher)?;
        }
    }

    Ok(format!("sha256-{}", to_hex(&hasher.finalize())))
}
