//! ACI archive identity: an image reachable at a transport URL.
//!
//! `cimd:aci-archive:v=0:<percent-encoded transport URL>[?query]`

use super::{DistParts, DistType, dist_base, query_escape, query_unescape, sorted_query_string};

/// Version of the aci-archive URI format.
pub const ACI_ARCHIVE_VERSION: u32 = 0;

const TRANSPORT_SCHEMES: &[&str] = &["file", "http", "https"];

/// An aci-archive identity wrapping a file/http/https transport locator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AciArchive {
    transport_url: String,
    query: Vec<(String, String)>,
}

impl AciArchive {
    /// Create an identity from a transport URL such as
    /// `file:///path/to/image.aci` or `https://example.com/app.aci`.
    pub fn from_transport_url(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or_default();
        if !TRANSPORT_SCHEMES.contains(&scheme) {
            return Err(crate::Error::MalformedUri {
                uri: url,
                reason: "transport url must be file, http or https".to_string(),
            });
        }
        Ok(Self {
            transport_url: url,
            query: Vec::new(),
        })
    }

    pub(crate) fn from_parts(uri: &str, parts: DistParts) -> crate::Result<Self> {
        if parts.version != ACI_ARCHIVE_VERSION {
            return Err(crate::Error::MalformedUri {
                uri: uri.to_string(),
                reason: format!("unsupported aci-archive version {}", parts.version),
            });
        }
        let transport_url =
            query_unescape(&parts.dist_string).ok_or_else(|| crate::Error::MalformedUri {
                uri: uri.to_string(),
                reason: "bad transport url escaping".to_string(),
            })?;
        let mut archive = Self::from_transport_url(transport_url).map_err(|_| {
            crate::Error::MalformedUri {
                uri: uri.to_string(),
                reason: "bad transport url".to_string(),
            }
        })?;
        let mut query = parts.query;
        query.sort();
        archive.query = query;
        Ok(archive)
    }

    /// The decoded transport URL.
    pub fn transport_url(&self) -> &str {
        &self.transport_url
    }

    /// The canonical URI string used as ref id. The transport URL is kept
    /// percent-encoded; outer query parameters are sorted.
    pub fn canonical_string(&self) -> String {
        let mut s = dist_base(DistType::AciArchive, ACI_ARCHIVE_VERSION);
        s.push_str(&query_escape(&self.transport_url));
        if !self.query.is_empty() {
            s.push('?');
            s.push_str(&sorted_query_string(&self.query));
        }
        s
    }
}
