//! Distribution identities: canonical URIs naming an image-access method.
//!
//! All identities share the URI shape `cimd:<type>:v=<u32>:<body>[?query]`.
//! The canonical string of an identity is byte-comparable and is used as the
//! ref id throughout the store.

mod aci_archive;
mod appc;
mod docker;

pub use aci_archive::AciArchive;
pub use appc::Appc;
pub use docker::Docker;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::fmt;

/// The distribution URI scheme.
pub const DIST_SCHEME: &str = "cimd";

/// Distribution identity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistType {
    Appc,
    AciArchive,
    Docker,
}

impl DistType {
    /// Look up a distribution type by its URI name.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "appc" => Ok(Self::Appc),
            "aci-archive" => Ok(Self::AciArchive),
            "docker" => Ok(Self::Docker),
            other => Err(crate::Error::UnknownDistributionType(other.to_string())),
        }
    }

    /// The type name as used in distribution URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appc => "appc",
            Self::AciArchive => "aci-archive",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for DistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `cimd:<type>:v=<version>:` prefix of a distribution URI.
pub fn dist_base(dist_type: DistType, version: u32) -> String {
    format!("{DIST_SCHEME}:{dist_type}:v={version}:")
}

/// The pieces of a distribution URI before kind-specific interpretation.
#[derive(Debug)]
pub(crate) struct DistParts {
    pub dist_type: DistType,
    pub version: u32,
    pub dist_string: String,
    pub query: Vec<(String, String)>,
}

fn malformed(uri: &str, reason: impl Into<String>) -> crate::Error {
    crate::Error::MalformedUri {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

/// Split a raw distribution URI into scheme-checked parts.
pub(crate) fn parse_dist(uri: &str) -> crate::Result<DistParts> {
    let rest = uri
        .strip_prefix(&format!("{DIST_SCHEME}:"))
        .ok_or_else(|| malformed(uri, format!("unsupported scheme, expected {DIST_SCHEME}")))?;

    let (opaque, raw_query) = match rest.split_once('?') {
        Some((o, q)) => (o, Some(q)),
        None => (rest, None),
    };

    let mut parts = opaque.splitn(3, ':');
    let (type_part, version_part, dist_string) =
        match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(v), Some(d)) => (t, v, d),
            _ => return Err(malformed(uri, "expected <type>:v=<version>:<body>")),
        };

    let dist_type = DistType::from_name(type_part)?;
    let version = version_part
        .strip_prefix("v=")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| malformed(uri, format!("malformed version: {version_part}")))?;

    let query = match raw_query {
        Some(q) => parse_query(q, uri)?,
        None => Vec::new(),
    };

    Ok(DistParts {
        dist_type,
        version,
        dist_string: dist_string.to_string(),
        query,
    })
}

/// A distribution identity, dispatched by kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Distribution {
    Appc(Appc),
    AciArchive(AciArchive),
    Docker(Docker),
}

impl Distribution {
    /// Parse a distribution URI string into an identity.
    pub fn parse(uri: &str) -> crate::Result<Self> {
        let parts = parse_dist(uri)?;
        match parts.dist_type {
            DistType::Appc => Appc::from_parts(uri, parts).map(Self::Appc),
            DistType::AciArchive => AciArchive::from_parts(uri, parts).map(Self::AciArchive),
            DistType::Docker => Docker::from_parts(uri, parts).map(Self::Docker),
        }
    }

    /// The identity kind.
    pub fn dist_type(&self) -> DistType {
        match self {
            Self::Appc(_) => DistType::Appc,
            Self::AciArchive(_) => DistType::AciArchive,
            Self::Docker(_) => DistType::Docker,
        }
    }

    /// The canonical, byte-comparable URI string. Two identities are equal
    /// iff their canonical strings are equal.
    pub fn canonical_string(&self) -> String {
        match self {
            Self::Appc(a) => a.canonical_string(),
            Self::AciArchive(a) => a.canonical_string(),
            Self::Docker(d) => d.canonical_string(),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

// Query escaping: everything but [A-Za-z0-9-_.~] is percent-encoded with
// uppercase hex, space becomes '+'.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a query value.
pub fn query_escape(s: &str) -> String {
    utf8_percent_encode(s, QUERY_ESCAPE)
        .to_string()
        .replace("%20", "+")
}

/// Decode a percent-encoded query value.
pub fn query_unescape(s: &str) -> Option<String> {
    let s = s.replace('+', " ");
    percent_decode_str(&s)
        .decode_utf8()
        .ok()
        .map(|c| c.into_owned())
}

fn parse_query(raw: &str, uri: &str) -> crate::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for piece in raw.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = piece.split_once('=').unwrap_or((piece, ""));
        let k = query_unescape(k).ok_or_else(|| malformed(uri, "bad query key escaping"))?;
        let v = query_unescape(v).ok_or_else(|| malformed(uri, "bad query value escaping"))?;
        pairs.push((k, v));
    }
    Ok(pairs)
}

/// Render query pairs sorted by key (and by value within a repeated key),
/// with values percent-encoded.
pub(crate) fn sorted_query_string(pairs: &[(String, String)]) -> String {
    let mut pairs = pairs.to_vec();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, query_escape(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_query_escape_known_values() {
        assert_eq!(query_escape("?&*/"), "%3F%26%2A%2F");
        assert_eq!(query_escape("v1.0.0"), "v1.0.0");
        assert_eq!(query_escape("a b"), "a+b");
        assert_eq!(query_unescape("%3F%26%2A%2F").unwrap(), "?&*/");
        assert_eq!(query_unescape("a+b").unwrap(), "a b");
    }

    #[test]
    fn test_parse_dist_shapes() {
        let parts = parse_dist("cimd:appc:v=0:example.com/app?version=v1.0.0").unwrap();
        assert_eq!(parts.dist_type, DistType::Appc);
        assert_eq!(parts.version, 0);
        assert_eq!(parts.dist_string, "example.com/app");
        assert_eq!(parts.query, vec![("version".to_string(), "v1.0.0".to_string())]);

        // Docker bodies keep their colons.
        let parts = parse_dist("cimd:docker:v=0:reg.example.com:4000/busybox:latest").unwrap();
        assert_eq!(parts.dist_string, "reg.example.com:4000/busybox:latest");
    }

    #[test]
    fn test_parse_dist_errors() {
        assert!(matches!(
            Distribution::parse("cimd:bittorrent:v=0:whatever"),
            Err(crate::Error::UnknownDistributionType(_))
        ));
        assert!(Distribution::parse("http://example.com").is_err());
        assert!(Distribution::parse("cimd:appc:v=x:name").is_err());
        assert!(Distribution::parse("cimd:appc:v=1:name").is_err());
        assert!(Distribution::parse("cimd:appc:name").is_err());
    }

    proptest! {
        // Canonical strings are stable under query-pair permutation and
        // re-parsing round-trips them.
        #[test]
        fn prop_canonical_stable_under_permutation(
            mut labels in proptest::collection::vec(
                ("[a-z]{1,8}", "[a-zA-Z0-9?&*/ ]{0,12}"),
                0..6,
            ),
        ) {
            let appc = Appc::new("example.com/app", labels.clone()).unwrap();
            labels.reverse();
            let reversed = Appc::new("example.com/app", labels).unwrap();
            prop_assert_eq!(appc.canonical_string(), reversed.canonical_string());

            let canonical = appc.canonical_string();
            let reparsed = Distribution::parse(&canonical).unwrap();
            prop_assert_eq!(reparsed.canonical_string(), canonical);
        }
    }
}
