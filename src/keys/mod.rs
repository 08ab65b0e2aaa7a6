//! One identity's SSH key collection.
//!
//! Keys live as one file each under `<keysRoot>/<identity>`. A
//! [`KeyManager`] holds an exclusive lock on that directory for the length
//! of a session. Additions are written and index shifts are renamed on disk
//! only when the session is finalized. Removals take effect immediately.

mod fingerprint;
mod install;
mod stored;

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::arch::shell::shell_program;
use crate::config::{Config, SizeRange};
use crate::identity::Identity;
use crate::input;

pub use fingerprint::{parse_reply, Algorithm, Fingerprint};
pub use stored::StoredKey;

/// Lock file inside a key storage area. Hidden, so never listed as a key.
pub const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("{0}")]
    Validation(String),
    #[error("corrupt key {filename}: {reason}")]
    Corrupt { filename: String, reason: String },
    #[error("fingerprint unavailable ({algorithm}): {reason}")]
    FingerprintUnavailable { algorithm: Algorithm, reason: String },
    #[error("another session is managing keys in {}", .0.display())]
    Busy(PathBuf),
    #[error("{operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
    #[error("key installation failed: {0}")]
    Install(String),
}

impl KeyError {
    pub(crate) fn io(operation: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let operation = operation.into();
        move |source| KeyError::Io { operation, source }
    }
}

/// Limits a stored or newly added key must satisfy.
#[derive(Clone, Debug)]
pub struct KeyPolicy {
    pub label_max: usize,
    pub data_sizes: Vec<usize>,
    /// Accepted fingerprint bit lengths.
    pub bits: SizeRange,
}

impl KeyPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            label_max: config.key_label_max,
            data_sizes: config.key_data_sizes.clone(),
            bits: config.key_bits,
        }
    }
}

/// External programs the manager runs.
#[derive(Clone, Debug)]
pub struct KeyTools {
    /// Shell that interprets tool command lines.
    pub shell: PathBuf,
    pub keygen: String,
    pub install_keys: Option<String>,
}

impl KeyTools {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shell: shell_program(&config.shell),
            keygen: config.keygen.clone(),
            install_keys: config.install_keys.clone(),
        }
    }
}

/// A file in the storage area that failed to load. It stays on disk.
#[derive(Debug)]
pub struct CorruptKey {
    pub filename: String,
    pub error: KeyError,
}

#[derive(Debug, Default)]
pub struct KeyListing {
    /// Loaded keys in filename order, indexed by position.
    pub keys: Vec<StoredKey>,
    pub corrupt: Vec<CorruptKey>,
}

/// Loads every key in `dir` without taking the session lock.
pub fn list(dir: &Path, identity: &Identity, policy: &KeyPolicy) -> Result<KeyListing, KeyError> {
    let mut names: Vec<OsString> = Vec::new();
    let entries = fs::read_dir(dir).map_err(KeyError::io(format!("opendir({})", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(KeyError::io(format!("readdir({})", dir.display())))?;
        names.push(entry.file_name());
    }
    names.sort();

    let mut listing = KeyListing::default();
    for name in names {
        if name.as_bytes().starts_with(b".") {
            continue;
        }

        let result = match name.to_str() {
            Some(filename) => StoredKey::import(dir, filename, identity.as_str(), policy),
            None => Err(KeyError::Corrupt {
                filename: name.to_string_lossy().into_owned(),
                reason: "filename is not text".to_string(),
            }),
        };

        match result {
            Ok(mut key) => {
                key.index = listing.keys.len();
                debug!(filename = ?name, index = key.index, "loaded key");
                listing.keys.push(key);
            }
            Err(error) => {
                warn!(filename = ?name, error = %error, "skipping corrupt key");
                listing.corrupt.push(CorruptKey {
                    filename: name.to_string_lossy().into_owned(),
                    error,
                });
            }
        }
    }
    Ok(listing)
}

/// What [`KeyManager::finalize`] did.
#[derive(Debug)]
pub struct FinalizeReport {
    /// `(old, new)` filename pairs.
    pub renamed: Vec<(String, String)>,
    /// Filenames created for new keys.
    pub written: Vec<String>,
    /// Per-file failures; the affected files are left as they were.
    pub failures: Vec<(String, KeyError)>,
    pub install: Result<(), KeyError>,
}

impl FinalizeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.install.is_ok()
    }
}

/// A locked editing session over one identity's keys.
///
/// Dropping a manager without calling [`finalize`](Self::finalize) discards
/// unwritten additions. Index gaps left by removals are closed by the next
/// session that finalizes.
#[derive(Debug)]
pub struct KeyManager {
    dir: PathBuf,
    identity: Identity,
    policy: KeyPolicy,
    tools: KeyTools,
    keys: Vec<StoredKey>,
    corrupt: Vec<CorruptKey>,
    _lock: File,
}

impl KeyManager {
    pub fn open(
        dir: impl Into<PathBuf>,
        identity: Identity,
        policy: KeyPolicy,
        tools: KeyTools,
    ) -> Result<Self, KeyError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(KeyError::io(format!("mkdir({})", dir.display())))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(KeyError::io(format!("open({})", lock_path.display())))?;
        lock.try_lock_exclusive()
            .map_err(|_| KeyError::Busy(dir.clone()))?;

        let listing = list(&dir, &identity, &policy)?;
        info!(
            identity = %identity,
            keys = listing.keys.len(),
            corrupt = listing.corrupt.len(),
            "opened key storage"
        );

        Ok(Self {
            dir,
            identity,
            policy,
            tools,
            keys: listing.keys,
            corrupt: listing.corrupt,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn keys(&self) -> &[StoredKey] {
        &self.keys
    }

    pub fn corrupt(&self) -> &[CorruptKey] {
        &self.corrupt
    }

    /// Adds a key stamped with the current time. `data` may be pasted as a
    /// whole public key line; only the base64 token is kept. Nothing is
    /// written until [`finalize`](Self::finalize).
    pub fn add(&mut self, label: &str, data: &str) -> Result<&StoredKey, KeyError> {
        if !input::label_valid(label, self.policy.label_max) {
            return Err(KeyError::Validation(format!("invalid key label {label:?}")));
        }
        let data = input::normalize_key_data(data, &self.policy.data_sizes)
            .map_err(KeyError::Validation)?;
        if data.is_empty() {
            return Err(KeyError::Validation("no key data".to_string()));
        }

        let mut key = StoredKey::new(label, data, Utc::now().timestamp());
        key.index = self.keys.len();
        debug!(index = key.index, label, "added key");
        self.keys.push(key);
        Ok(&self.keys[self.keys.len() - 1])
    }

    /// Removes the key at 1-based `user_index` and deletes its file. Later
    /// keys shift down by one.
    pub fn remove(&mut self, user_index: usize) -> Result<StoredKey, KeyError> {
        if self.keys.is_empty() {
            return Err(KeyError::Validation("no keys to remove".to_string()));
        }
        if user_index == 0 || user_index > self.keys.len() {
            return Err(KeyError::Validation(format!(
                "invalid key index, 1-{}",
                self.keys.len()
            )));
        }

        let position = user_index - 1;
        let mut key = self.keys.remove(position);
        if let Err(error) = key.delete(&self.dir) {
            self.keys.insert(position, key);
            return Err(error);
        }

        for (index, key) in self.keys.iter_mut().enumerate() {
            key.index = index;
        }
        info!(index = user_index, label = %key.label, "removed key");
        Ok(key)
    }

    /// Writes every key that has no file yet.
    pub fn persist(&mut self) -> Result<Vec<String>, KeyError> {
        let mut written = Vec::new();
        for key in &mut self.keys {
            if let Some(filename) = key.export(&self.dir, self.identity.as_str())? {
                written.push(filename);
            }
        }
        Ok(written)
    }

    /// Ends the session: renames shifted files in ascending order, writes
    /// new keys, then runs the install step. Failures are collected, not
    /// returned early.
    pub fn finalize(mut self) -> FinalizeReport {
        let mut renamed = Vec::new();
        let mut written = Vec::new();
        let mut failures = Vec::new();

        for key in &mut self.keys {
            match key.rename_to_derived(&self.dir) {
                Ok(Some(pair)) => renamed.push(pair),
                Ok(None) => {}
                Err(error) => {
                    let filename = key.storage_filename().unwrap_or_default().to_string();
                    warn!(filename = %filename, error = %error, "failed to rename key");
                    failures.push((filename, error));
                }
            }
        }

        for key in &mut self.keys {
            match key.export(&self.dir, self.identity.as_str()) {
                Ok(Some(filename)) => written.push(filename),
                Ok(None) => {}
                Err(error) => {
                    let filename = key.derive_filename().unwrap_or_else(|_| key.label.clone());
                    warn!(filename = %filename, error = %error, "failed to write key");
                    failures.push((filename, error));
                }
            }
        }

        let install = install::install_keys(&self.tools, &self.identity);
        if let Err(error) = &install {
            warn!(identity = %self.identity, error = %error, "key installation failed");
        }

        FinalizeReport {
            renamed,
            written,
            failures,
            install,
        }
    }

    pub fn fingerprint(&self, key: &StoredKey, algorithm: Algorithm) -> Result<Fingerprint, KeyError> {
        self.with_key_file(key, |path| {
            fingerprint::run(&self.tools, path, algorithm, self.policy.bits)
        })
    }

    /// SHA256 then MD5. Fails if either is unavailable.
    pub fn fingerprints(&self, key: &StoredKey) -> Result<[Fingerprint; 2], KeyError> {
        self.with_key_file(key, |path| {
            let sha256 = fingerprint::run(&self.tools, path, Algorithm::Sha256, self.policy.bits)?;
            let md5 = fingerprint::run(&self.tools, path, Algorithm::Md5, self.policy.bits)?;
            Ok([sha256, md5])
        })
    }

    /// Calls `f` with a path holding the key's body: its storage file, or a
    /// temporary copy for a key that has not been written yet.
    fn with_key_file<T>(
        &self,
        key: &StoredKey,
        f: impl FnOnce(&Path) -> Result<T, KeyError>,
    ) -> Result<T, KeyError> {
        match key.storage_filename() {
            Some(filename) => f(&self.dir.join(filename)),
            None => {
                let temp = fingerprint::temp_key_file(&key.body(self.identity.as_str()))?;
                f(temp.path())
            }
        }
    }
}
