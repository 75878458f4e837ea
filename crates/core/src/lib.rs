//! Core domain types for the stowage image store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and streaming digest computation
//! - Distribution identities (appc, aci-archive, docker) and their
//!   canonical URI strings
//! - Store configuration

pub mod config;
pub mod digest;
pub mod distribution;
pub mod error;

pub use config::StoreConfig;
pub use digest::{Algorithm, Digester, parse_digest, shard_dirs};
pub use distribution::{AciArchive, Appc, DistType, Distribution, Docker};
pub use error::{Error, Result};
