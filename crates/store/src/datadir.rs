//! Data directory bootstrap.
//!
//! Creates the full on-disk layout with group-setgid semantics so a
//! well-defined unix group can operate on the store. The umask is cleared
//! while creating so the setgid bit propagates.

use crate::error::StoreResult;
use nix::sys::stat::{Mode, umask};
use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const DEFAULT_PATH_PERM: u32 = 0o2770;
pub const DEFAULT_FILE_PERM: u32 = 0o660;

/// Clears the process umask for the lifetime of the guard.
pub struct UmaskGuard {
    prev: Mode,
}

impl UmaskGuard {
    pub fn clear() -> Self {
        Self {
            prev: umask(Mode::empty()),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.prev);
    }
}

/// Directories of the data dir, relative paths with their modes.
const DIRS: &[(&str, u32)] = &[
    (".", 0o2750),
    ("tmp", 0o2750),
    ("locks", 0o2750),
    ("casref", 0o2770),
    ("casref/blob", 0o2770),
    ("casref/blobdb", 0o2770),
    ("casref/refdb", 0o2770),
    ("casref/bloblocks", 0o2770),
    ("casref/tmp", 0o2770),
    ("treestore", 0o2770),
    ("treestore/db", 0o2770),
    ("treestore/tree", 0o2700),
    ("treestore/locks", 0o2700),
    ("pods", 0o2750),
    ("pods/embryo", 0o2750),
    ("pods/prepare", 0o2750),
    ("pods/prepared", 0o2750),
    ("pods/run", 0o2750),
    ("pods/exited-garbage", 0o2750),
    ("pods/garbage", 0o2750),
];

const DB_FILES: &[&str] = &["casref/blobdb/db", "casref/refdb/db", "treestore/db/db"];

pub fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, Permissions::from_mode(mode))
}

/// Create the data directory structure and pre-create the database files.
pub fn setup(data_dir: impl AsRef<Path>) -> StoreResult<()> {
    let data_dir = data_dir.as_ref();
    let _umask = UmaskGuard::clear();

    for (rel, mode) in DIRS {
        let path = if *rel == "." {
            data_dir.to_path_buf()
        } else {
            data_dir.join(rel)
        };
        make_dir(&path, *mode)?;
    }

    for rel in DB_FILES {
        let path = data_dir.join(rel);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        fs::set_permissions(&path, Permissions::from_mode(DEFAULT_FILE_PERM))?;
    }

    Ok(())
}
