//! Content digest parsing and streaming computation.
//!
//! Digests are strings of the form `<algorithm>-<lowercase hex>` where the
//! hex portion is the full raw hash output, never truncated. The legacy
//! `<algorithm>:<hex>` form is accepted on input and normalized.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;

/// Supported digest algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Look up an algorithm by its digest-prefix name.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(crate::Error::UnknownAlgorithm(other.to_string())),
        }
    }

    /// The algorithm name as used in digest strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length in characters of the algorithm prefix of a digest string.
    pub fn prefix_len(&self) -> usize {
        self.as_str().len()
    }

    /// Raw hash output size in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Length in characters of a full digest string.
    pub fn full_len(&self) -> usize {
        self.prefix_len() + 1 + self.digest_size() * 2
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

enum Inner {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Incremental digest computation for one algorithm.
pub struct Digester {
    algorithm: Algorithm,
    inner: Inner,
}

impl Digester {
    /// Create a new digester for the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        let inner = match algorithm {
            Algorithm::Sha256 => Inner::Sha256(Sha256::new()),
            Algorithm::Sha512 => Inner::Sha512(Sha512::new()),
        };
        Self { algorithm, inner }
    }

    /// The algorithm this digester hashes with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Update the hash state with data.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Sha256(h) => h.update(data),
            Inner::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the full `<algo>-<hex>` digest string.
    pub fn finalize(self) -> String {
        let hex = match self.inner {
            Inner::Sha256(h) => to_hex(&h.finalize()),
            Inner::Sha512(h) => to_hex(&h.finalize()),
        };
        format!("{}-{}", self.algorithm.as_str(), hex)
    }
}

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse a digest string, returning the normalized digest (colon replaced
/// with hyphen) and its algorithm.
///
/// The input may be a full digest or a prefix of one; only the shape and the
/// algorithm name are validated here.
pub fn parse_digest(s: &str) -> crate::Result<(String, Algorithm)> {
    let ds = s.replacen(':', "-", 1);

    // Shape: one or more [A-Za-z0-9_+.-], a hyphen, one or more hex chars.
    let valid_chars = ds
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-'));
    if !valid_chars {
        return Err(crate::Error::BadDigest(s.to_string()));
    }
    let Some(last_dash) = ds.rfind('-') else {
        return Err(crate::Error::BadDigest(s.to_string()));
    };
    let hex = &ds[last_dash + 1..];
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(crate::Error::BadDigest(s.to_string()));
    }

    let name = ds.split('-').next().unwrap_or_default();
    if name.is_empty() {
        return Err(crate::Error::BadDigest(s.to_string()));
    }
    let algorithm = Algorithm::from_name(name)?;
    Ok((ds, algorithm))
}

/// Split a digest into the two shard directory names used by the on-disk
/// layout: the first three and next three hex characters after the hyphen.
pub fn shard_dirs(digest: &str) -> crate::Result<(String, String)> {
    let hex = digest
        .split_once('-')
        .map(|(_, hex)| hex)
        .ok_or_else(|| crate::Error::BadDigest(digest.to_string()))?;
    if hex.len() < 6 {
        return Err(crate::Error::BadDigest(digest.to_string()));
    }
    Ok((hex[0..3].to_string(), hex[3..6].to_string()))
}
