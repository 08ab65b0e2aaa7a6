//! Per-repository metadata: owner, description, and sharing kind.
//!
//! Stored as a small line-oriented file (`cgitrc`) inside each repository.
//! Callers depend on the [`MetadataStore`] trait, not on the file format.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Metadata file name inside a repository directory.
pub const METADATA_FILE: &str = "cgitrc";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no repository metadata at {0}")]
    NotFound(PathBuf),
    #[error("repository metadata {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepoKind {
    #[default]
    Unknown,
    Shared,
    Mirrored,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub owner: String,
    pub description: Option<String>,
    pub kind: RepoKind,
}

impl RepositoryRecord {
    pub fn new(owner: impl Into<String>, kind: RepoKind) -> Self {
        Self {
            owner: owner.into(),
            description: None,
            kind,
        }
    }

    /// Parses the line format. Unknown lines are ignored and `#` starts a
    /// comment anywhere on a line.
    pub fn parse(text: &str) -> Self {
        let mut record = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default();

            if let Some(owner) = line.strip_prefix("owner=") {
                record.owner = owner.to_string();
            } else if let Some(desc) = line.strip_prefix("desc=") {
                record.description = Some(desc.to_string()).filter(|d| !d.is_empty());
            } else if line == "mirrored" {
                record.kind = RepoKind::Mirrored;
            } else if line == "shared" {
                record.kind = RepoKind::Shared;
            }
        }
        record
    }
}

impl fmt::Display for RepositoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.owner.is_empty() {
            writeln!(f, "owner={}", self.owner)?;
        }
        if let Some(desc) = self.description.as_deref().filter(|d| !d.is_empty()) {
            writeln!(f, "desc={desc}")?;
        }
        match self.kind {
            RepoKind::Shared => writeln!(f, "shared"),
            RepoKind::Mirrored => writeln!(f, "mirrored"),
            RepoKind::Unknown => Ok(()),
        }
    }
}

pub trait MetadataStore {
    fn load(&self, repo_dir: &Path) -> Result<RepositoryRecord, MetadataError>;
    fn save(&self, repo_dir: &Path, record: &RepositoryRecord) -> Result<(), MetadataError>;
}

/// Reads and writes `<repo>/cgitrc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CgitrcStore;

impl MetadataStore for CgitrcStore {
    fn load(&self, repo_dir: &Path) -> Result<RepositoryRecord, MetadataError> {
        let path = repo_dir.join(METADATA_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(RepositoryRecord::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(MetadataError::NotFound(path)),
            Err(source) => Err(MetadataError::Io { path, source }),
        }
    }

    fn save(&self, repo_dir: &Path, record: &RepositoryRecord) -> Result<(), MetadataError> {
        let path = repo_dir.join(METADATA_FILE);
        fs::write(&path, record.to_string()).map_err(|source| MetadataError::Io { path, source })
    }
}
