//! Configuration types shared across crates.

use crate::digest::Algorithm;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Digest algorithm used for newly written blobs.
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/stowage")
}

fn default_algorithm() -> Algorithm {
    Algorithm::Sha256
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            algorithm: default_algorithm(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from an optional TOML file merged with
    /// `STOWAGE_`-prefixed environment variables.
    pub fn load(config_file: Option<&Path>) -> crate::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("STOWAGE_"))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::load(None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/stowage"));
        assert_eq!(config.algorithm, Algorithm::Sha256);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "data_dir = \"/srv/images\"").unwrap();
        writeln!(file, "algorithm = \"sha512\"").unwrap();

        let config = StoreConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/images"));
        assert_eq!(config.algorithm, Algorithm::Sha512);
    }
}
