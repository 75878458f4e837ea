//! Docker registry identity.
//!
//! `cimd:docker:v=0:[REGISTRY[:PORT]/]NAME[:TAG|@DIGEST]`
//!
//! The canonical form expands the defaults a docker string may omit; the
//! simple form strips them back out for human display.

use super::{DistParts, DistType, dist_base};

/// Version of the docker URI format.
pub const DOCKER_VERSION: u32 = 0;

const DEFAULT_REGISTRY: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";
const DEFAULT_REPO_PREFIX: &str = "library/";

/// A docker identity with all defaults expanded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Docker {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Docker {
    /// Parse a docker string such as `busybox`, `busybox:1.0`,
    /// `myregistry.example.com:4000/busybox` or `busybox@sha256:...`.
    pub fn from_docker_string(ds: &str) -> crate::Result<Self> {
        let bad = || crate::Error::BadDockerString(ds.to_string());

        let (rest, digest) = match ds.split_once('@') {
            Some((r, d)) => {
                if d.is_empty() || !d.contains(':') {
                    return Err(bad());
                }
                (r, Some(d.to_string()))
            }
            None => (ds, None),
        };

        // The first path component is a registry host when it looks like one.
        let (registry, name_and_tag) = match rest.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first), remainder)
            }
            _ => (None, rest),
        };

        // A ':' past the last '/' separates the tag.
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(idx) if idx > name_and_tag.rfind('/').map_or(0, |s| s) => {
                let tag = &name_and_tag[idx + 1..];
                if tag.is_empty() {
                    return Err(bad());
                }
                (&name_and_tag[..idx], Some(tag.to_string()))
            }
            _ => (name_and_tag, None),
        };
        if name.is_empty() {
            return Err(bad());
        }

        let registry = registry.unwrap_or(DEFAULT_REGISTRY).to_string();
        let repository = if registry == DEFAULT_REGISTRY && !name.contains('/') {
            format!("{DEFAULT_REPO_PREFIX}{name}")
        } else {
            name.to_string()
        };
        let tag = match (&digest, tag) {
            (Some(_), _) => None,
            (None, Some(t)) => Some(t),
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub(crate) fn from_parts(uri: &str, parts: DistParts) -> crate::Result<Self> {
        if parts.version != DOCKER_VERSION {
            return Err(crate::Error::MalformedUri {
                uri: uri.to_string(),
                reason: format!("unsupported docker version {}", parts.version),
            });
        }
        Self::from_docker_string(&parts.dist_string).map_err(|_| crate::Error::MalformedUri {
            uri: uri.to_string(),
            reason: "bad docker string".to_string(),
        })
    }

    /// The registry host (defaults expanded).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository name (defaults expanded).
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The docker string with every default filled in.
    pub fn full_string(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        match (&self.digest, &self.tag) {
            (Some(d), _) => {
                s.push('@');
                s.push_str(d);
            }
            (None, Some(t)) => {
                s.push(':');
                s.push_str(t);
            }
            (None, None) => {}
        }
        s
    }

    /// The docker string with defaults stripped out, for human display.
    pub fn simple_string(&self) -> String {
        let repository = if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix(DEFAULT_REPO_PREFIX)
                .unwrap_or(&self.repository)
        } else {
            &self.repository
        };
        let mut s = if self.registry == DEFAULT_REGISTRY {
            repository.to_string()
        } else {
            format!("{}/{}", self.registry, repository)
        };
        match (&self.digest, &self.tag) {
            (Some(d), _) => {
                s.push('@');
                s.push_str(d);
            }
            (None, Some(t)) if t != DEFAULT_TAG => {
                s.push(':');
                s.push_str(t);
            }
            _ => {}
        }
        s
    }

    /// The canonical URI string used as ref id.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}{}",
            dist_base(DistType::Docker, DOCKER_VERSION),
            self.full_string()
        )
    }
}
