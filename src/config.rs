use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arch::paths;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "GJ_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: usize,
    pub max: usize,
}

impl SizeRange {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, n: usize) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub base_path: PathBuf,
    pub keys_root: PathBuf,
    pub git_shell: String,
    pub shell: String,
    pub keygen: String,
    pub hashsum: String,
    /// Command prefix run after the key set changes; the identity and the
    /// session pid are appended as escaped arguments.
    pub install_keys: Option<String>,
    pub salt: String,
    pub identity_size: SizeRange,
    pub key_bits: SizeRange,
    pub key_data_sizes: Vec<usize>,
    pub key_label_max: usize,
    pub hash_size: usize,
    pub hashsum_result_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/home/git/repositories"),
            keys_root: PathBuf::from("/home/git/keys"),
            git_shell: "git-shell".to_string(),
            shell: "bash".to_string(),
            keygen: "ssh-keygen".to_string(),
            hashsum: "sha256sum".to_string(),
            install_keys: None,
            salt: String::new(),
            identity_size: SizeRange::new(3, 32),
            key_bits: SizeRange::new(2048, 16384),
            key_data_sizes: vec![372, 544, 716],
            key_label_max: 30,
            hash_size: 16,
            hashsum_result_size: 64,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `explicit`, else `$GJ_CONFIG`, else the default location.
    ///
    /// Only a missing file at the default location falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(&path));
        }

        let default = Path::new(paths::DEFAULT_CONFIG_PATH);
        match Self::from_file(default) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn keys_dir(&self, identity: &str) -> PathBuf {
        paths::keys_dir(&self.keys_root, identity)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"basePath": "/srv/git", "keyBits": {{"min": 1024, "max": 4096}}}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.base_path, PathBuf::from("/srv/git"));
        assert_eq!(config.key_bits, SizeRange::new(1024, 4096));
        assert_eq!(config.key_label_max, 30);
        assert_eq!(config.git_shell, "git-shell");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "basePath=/srv/git").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/gj.json"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn size_range_is_inclusive() {
        let range = SizeRange::new(3, 5);
        assert!(!range.contains(2));
        assert!(range.contains(3));
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }
}
