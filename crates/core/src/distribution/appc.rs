//! Appc image-discovery identity.
//!
//! `cimd:appc:v=0:<name>?label01=value01&label02=value02`
//!
//! Labels are sorted and their values percent-encoded in the canonical form,
//! so two appc identities compare equal iff they name the same image.

use super::{DistParts, DistType, dist_base, sorted_query_string};

/// Version of the appc URI format.
pub const APPC_VERSION: u32 = 0;

/// An appc identity: an AC name plus discovery labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Appc {
    name: String,
    labels: Vec<(String, String)>,
}

fn valid_ac_identifier(s: &str) -> bool {
    // Lowercase alphanumeric segments separated by single '-', '.', '_',
    // '~' or '/' characters.
    if s.is_empty() {
        return false;
    }
    let mut prev_sep = true;
    for c in s.chars() {
        match c {
            'a'..='z' | '0'..='9' => prev_sep = false,
            '-' | '.' | '_' | '~' | '/' => {
                if prev_sep {
                    return false;
                }
                prev_sep = true;
            }
            _ => return false,
        }
    }
    !prev_sep
}

impl Appc {
    /// Create an appc identity from a name and labels.
    pub fn new(
        name: impl Into<String>,
        labels: impl IntoIterator<Item = (String, String)>,
    ) -> crate::Result<Self> {
        let name = name.into();
        if !valid_ac_identifier(&name) {
            return Err(crate::Error::BadAppString(name));
        }
        let mut labels: Vec<(String, String)> = labels.into_iter().collect();
        for (k, _) in &labels {
            if !valid_ac_identifier(k) {
                return Err(crate::Error::BadAppString(format!("bad label name {k}")));
            }
        }
        labels.sort();
        Ok(Self { name, labels })
    }

    /// Parse an appc app string: `name[:version][,label=value,...]`.
    pub fn from_app_string(s: &str) -> crate::Result<Self> {
        let mut pieces = s.split(',');
        let first = pieces.next().unwrap_or_default();

        let (name, version) = match first.split_once(':') {
            Some((n, v)) => (n, Some(v)),
            None => (first, None),
        };

        let mut labels = Vec::new();
        if let Some(v) = version {
            if v.is_empty() {
                return Err(crate::Error::BadAppString(s.to_string()));
            }
            labels.push(("version".to_string(), v.to_string()));
        }
        for piece in pieces {
            let (k, v) = piece
                .split_once('=')
                .ok_or_else(|| crate::Error::BadAppString(s.to_string()))?;
            if k == "version" && version.is_some() {
                return Err(crate::Error::BadAppString(s.to_string()));
            }
            labels.push((k.to_string(), v.to_string()));
        }

        Self::new(name, labels)
    }

    pub(crate) fn from_parts(uri: &str, parts: DistParts) -> crate::Result<Self> {
        if parts.version != APPC_VERSION {
            return Err(crate::Error::MalformedUri {
                uri: uri.to_string(),
                reason: format!("unsupported appc version {}", parts.version),
            });
        }
        Self::new(parts.dist_string, parts.query).map_err(|_| crate::Error::MalformedUri {
            uri: uri.to_string(),
            reason: "bad appc name or labels".to_string(),
        })
    }

    /// The AC name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The discovery labels, sorted.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// The canonical URI string used as ref id.
    pub fn canonical_string(&self) -> String {
        let mut s = dist_base(DistType::Appc, APPC_VERSION);
        s.push_str(&self.name);
        if !self.labels.is_empty() {
            s.push('?');
            s.push_str(&sorted_query_string(&self.labels));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;

    #[test]
    fn test_from_app_string_canonical() {
        let tests = [
            ("example.com/app01", "cimd:appc:v=0:example.com/app01"),
            (
                "example.com/app01:v1.0.0",
                "cimd:appc:v=0:example.com/app01?version=v1.0.0",
            ),
            (
                "example.com/app01,version=v1.0.0",
                "cimd:appc:v=0:example.com/app01?version=v1.0.0",
            ),
            (
                "example.com/app01,version=v1.0.0,label01=?&*/",
                "cimd:appc:v=0:example.com/app01?label01=%3F%26%2A%2F&version=v1.0.0",
            ),
        ];
        for (input, want) in tests {
            let appc = Appc::from_app_string(input).unwrap();
            assert_eq!(appc.canonical_string(), want, "input {input}");

            // Parsing the canonical URI yields the same identity.
            let parsed = Distribution::parse(want).unwrap();
            assert_eq!(parsed.canonical_string(), want);
            assert_eq!(parsed, Distribution::Appc(appc));
        }
    }

    #[test]
    fn test_label_order_does_not_matter() {
        let a = Appc::from_app_string("example.com/app,os=linux,arch=amd64").unwrap();
        let b = Appc::from_app_string("example.com/app,arch=amd64,os=linux").unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_bad_app_strings() {
        assert!(Appc::from_app_string("").is_err());
        assert!(Appc::from_app_string("Example.com/App").is_err());
        assert!(Appc::from_app_string("example.com/app,notalabel").is_err());
        assert!(Appc::from_app_string("example.com/app:v1,version=v2").is_err());
        assert!(Appc::from_app_string("example.com/app:").is_err());
    }
}
