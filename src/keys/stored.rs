//! One enrolled key and its self-verifying storage format.
//!
//! A key is stored twice over: the filename carries index, label, local
//! creation time and state; the body carries the key data plus a comment
//! `<identity>@<label>/<unix time>`. Both are parsed independently on load
//! and must agree.
//!
//! ```text
//! 01_laptop-1_2016-4-21_1-25-10.key
//! ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ... alice@laptop-1/1461191110
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use tracing::info;

use super::{KeyError, KeyPolicy};
use crate::input::{self, KEY_TYPE};

const KEY_EXTENSION: &str = "key";
const DISABLED_EXTENSION: &str = "disabled";
const MAX_BODY_LEN: u64 = 16 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredKey {
    /// 0-based position in the sorted collection; never read back from disk.
    pub index: usize,
    /// Creation time, seconds since the epoch.
    pub timestamp: i64,
    pub label: String,
    pub disabled: bool,
    /// Base64 key material.
    pub data: String,
    storage_filename: Option<String>,
}

/// Filename fields, before they are checked against the body.
#[derive(Debug, PartialEq, Eq)]
struct FilenameFields {
    label: String,
    created: NaiveDateTime,
    disabled: bool,
}

/// Body fields, before they are checked against the filename.
#[derive(Debug, PartialEq, Eq)]
struct BodyFields {
    data: String,
    identity: String,
    label: String,
    timestamp: i64,
}

fn local_time(timestamp: i64) -> Result<NaiveDateTime, KeyError> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.naive_local())
        .ok_or_else(|| KeyError::Validation(format!("timestamp out of range: {timestamp}")))
}

fn corrupt(filename: &str, reason: impl Into<String>) -> KeyError {
    KeyError::Corrupt {
        filename: filename.to_string(),
        reason: reason.into(),
    }
}

fn label_valid(label: &str, policy: &KeyPolicy) -> bool {
    input::label_valid(label, policy.label_max)
}

/// Splits `text` on `sep` into exactly `N` unsigned numbers.
fn numbers<const N: usize>(text: &str, sep: char) -> Option<[u32; N]> {
    let mut out = [0u32; N];
    let mut parts = text.split(sep);
    for slot in out.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    parts.next().is_none().then_some(out)
}

fn parse_filename(name: &str, policy: &KeyPolicy) -> Result<FilenameFields, &'static str> {
    let mut fields = name.splitn(4, '_');
    let (Some(index), Some(label), Some(date), Some(rest)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err("filename does not have four '_' separated parts");
    };

    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return Err("filename index is not a number");
    }
    if !label_valid(label, policy) {
        return Err("filename label is invalid");
    }

    let (time, extension) = rest.split_once('.').ok_or("filename has no extension")?;
    let disabled = match extension {
        KEY_EXTENSION => false,
        DISABLED_EXTENSION => true,
        _ => return Err("unknown filename extension"),
    };

    let [year, month, day] = numbers::<3>(date, '-').ok_or("filename date is malformed")?;
    let [hour, minute, second] = numbers::<3>(time, '-').ok_or("filename time is malformed")?;

    let sane = (2016..=2099).contains(&year)
        && (1..=12).contains(&month)
        && day <= 31
        && hour <= 23
        && minute <= 59
        && second <= 59;
    if !sane {
        return Err("filename time is out of range");
    }

    let created = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or("filename time does not exist")?;

    Ok(FilenameFields {
        label: label.to_string(),
        created,
        disabled,
    })
}

fn parse_body(text: &str, policy: &KeyPolicy) -> Result<BodyFields, &'static str> {
    let line = text.strip_suffix('\n').unwrap_or(text);
    if line.contains('\n') {
        return Err("body has more than one line");
    }

    let mut tokens = line.split_ascii_whitespace();
    let (Some(kind), Some(data), Some(comment), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err("body is not '<type> <data> <comment>'");
    };

    if kind != KEY_TYPE {
        return Err("unsupported key type");
    }
    if !input::key_data_valid(data, &policy.data_sizes) {
        return Err("key data is invalid");
    }

    let (identity, rest) = comment.split_once('@').ok_or("comment has no identity")?;
    let (label, timestamp) = rest.split_once('/').ok_or("comment has no timestamp")?;
    if !label_valid(label, policy) {
        return Err("comment label is invalid");
    }
    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err("comment timestamp is not a number");
    }
    let timestamp = timestamp.parse().map_err(|_| "comment timestamp is out of range")?;

    Ok(BodyFields {
        data: data.to_string(),
        identity: identity.to_string(),
        label: label.to_string(),
        timestamp,
    })
}

impl StoredKey {
    /// A new, not yet persisted key.
    pub fn new(label: impl Into<String>, data: impl Into<String>, timestamp: i64) -> Self {
        Self {
            index: 0,
            timestamp,
            label: label.into(),
            disabled: false,
            data: data.into(),
            storage_filename: None,
        }
    }

    /// Name of the file backing this key, once it has been persisted.
    pub fn storage_filename(&self) -> Option<&str> {
        self.storage_filename.as_deref()
    }

    /// The filename this key should have at its current index.
    pub fn derive_filename(&self) -> Result<String, KeyError> {
        let t = local_time(self.timestamp)?;
        Ok(format!(
            "{:02}_{}_{}-{}-{}_{}-{}-{}.{}",
            self.index + 1,
            self.label,
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second(),
            if self.disabled { DISABLED_EXTENSION } else { KEY_EXTENSION },
        ))
    }

    pub fn body(&self, identity: &str) -> String {
        format!(
            "{KEY_TYPE} {} {identity}@{}/{}\n",
            self.data, self.label, self.timestamp
        )
    }

    /// Loads `dir/filename` and cross-checks filename against body.
    pub fn import(
        dir: &Path,
        filename: &str,
        identity: &str,
        policy: &KeyPolicy,
    ) -> Result<Self, KeyError> {
        let from_name = parse_filename(filename, policy).map_err(|r| corrupt(filename, r))?;

        let path = dir.join(filename);
        let meta = fs::metadata(&path).map_err(KeyError::io(format!("stat({})", path.display())))?;
        if !meta.is_file() {
            return Err(corrupt(filename, "not a regular file"));
        }
        if meta.len() > MAX_BODY_LEN {
            return Err(corrupt(filename, "body is too large"));
        }

        let raw = fs::read(&path).map_err(KeyError::io(format!("read({})", path.display())))?;
        let text = String::from_utf8(raw).map_err(|_| corrupt(filename, "body is not text"))?;
        let from_body = parse_body(&text, policy).map_err(|r| corrupt(filename, r))?;

        if from_body.identity != identity {
            return Err(corrupt(filename, "body belongs to another identity"));
        }
        if from_body.label != from_name.label {
            return Err(corrupt(filename, "label differs between filename and body"));
        }
        let created = local_time(from_body.timestamp)
            .map_err(|_| corrupt(filename, "comment timestamp is out of range"))?;
        if created != from_name.created {
            return Err(corrupt(filename, "timestamp differs between filename and body"));
        }

        Ok(Self {
            index: 0,
            timestamp: from_body.timestamp,
            label: from_body.label,
            disabled: from_name.disabled,
            data: from_body.data,
            storage_filename: Some(filename.to_string()),
        })
    }

    /// Writes the key under its derived filename unless it already has one.
    /// Returns the new filename when something was written.
    pub(crate) fn export(&mut self, dir: &Path, identity: &str) -> Result<Option<String>, KeyError> {
        if self.storage_filename.is_some() {
            return Ok(None);
        }

        let filename = self.derive_filename()?;
        let path = dir.join(&filename);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(KeyError::io(format!("create({})", path.display())))?;
        file.write_all(self.body(identity).as_bytes())
            .map_err(KeyError::io(format!("write({})", path.display())))?;

        self.storage_filename = Some(filename.clone());
        Ok(Some(filename))
    }

    /// Renames the backing file if the key's index moved. Returns
    /// `(old, new)` when a rename happened.
    pub(crate) fn rename_to_derived(&mut self, dir: &Path) -> Result<Option<(String, String)>, KeyError> {
        let Some(current) = self.storage_filename.clone() else {
            return Ok(None);
        };
        let derived = self.derive_filename()?;
        if current == derived {
            return Ok(None);
        }

        let from = dir.join(&current);
        let to = dir.join(&derived);
        let operation = format!("rename({} -> {})", from.display(), to.display());
        if to.exists() {
            return Err(KeyError::Io {
                operation,
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }
        fs::rename(&from, &to).map_err(KeyError::io(operation))?;

        info!(from = %current, to = %derived, "renamed key file");
        self.storage_filename = Some(derived.clone());
        Ok(Some((current, derived)))
    }

    /// Deletes the backing file, if any.
    pub(crate) fn delete(&mut self, dir: &Path) -> Result<(), KeyError> {
        let Some(filename) = self.storage_filename.take() else {
            return Ok(());
        };
        let path = dir.join(&filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => {
                self.storage_filename = Some(filename);
                Err(KeyError::Io {
                    operation: format!("unlink({})", path.display()),
                    source,
                })
            }
        }
    }
}
