//! Display fingerprints produced by an external inspection tool.
//!
//! The tool's reply is trusted only after it matches the expected shape;
//! anything else means the tool failed.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use super::{KeyError, KeyTools};
use crate::arch::tools;
use crate::config::SizeRange;
use crate::escape::ShellEscape;
use crate::process::{ProcessIo, SpawnSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Md5,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Sha256, Algorithm::Md5];

    /// Name passed to the tool's `-E` option.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Md5 => "md5",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "SHA256:",
            Algorithm::Md5 => "MD5:",
        }
    }

    /// Total length of the digest text, prefix included.
    fn digest_len(self) -> usize {
        match self {
            Algorithm::Sha256 => 50,
            Algorithm::Md5 => 51,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub algorithm: Algorithm,
    pub bits: usize,
    pub digest: String,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.bits, self.digest)
    }
}

/// Validates one reply line of the form `<bits> <prefix>:<digest> ...`.
pub fn parse_reply(reply: &str, algorithm: Algorithm, bits: SizeRange) -> Result<Fingerprint, String> {
    let mut tokens = reply.split_ascii_whitespace();
    let (Some(count), Some(digest)) = (tokens.next(), tokens.next()) else {
        return Err(format!("unexpected reply {reply:?}"));
    };

    let count: usize = count
        .parse()
        .map_err(|_| format!("bit count {count:?} is not a number"))?;
    if !bits.contains(count) {
        return Err(format!("bit count {count} outside {}-{}", bits.min, bits.max));
    }
    if !digest.starts_with(algorithm.prefix()) || digest.len() != algorithm.digest_len() {
        return Err(format!("digest {digest:?} is not a {algorithm} fingerprint"));
    }

    Ok(Fingerprint {
        algorithm,
        bits: count,
        digest: digest.to_string(),
    })
}

/// Scratch copy of an unpersisted key for the inspection tool. The file is
/// removed when the handle is dropped.
pub(crate) fn temp_key_file(body: &str) -> Result<NamedTempFile, KeyError> {
    let mut file = tempfile::Builder::new()
        .prefix("gj-")
        .suffix(".pub")
        .tempfile()
        .map_err(KeyError::io("create temporary key file"))?;
    file.write_all(body.as_bytes())
        .map_err(KeyError::io(format!("write({})", file.path().display())))?;
    Ok(file)
}

fn command_line(keygen: &Path, algorithm: Algorithm, key_path: &Path) -> OsString {
    let mut command = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = ShellEscape::new(&mut command).write_all(keygen.as_os_str().as_bytes());
    command.extend_from_slice(format!(" -l -E {} -f ", algorithm.name()).as_bytes());
    let _ = ShellEscape::new(&mut command).write_all(key_path.as_os_str().as_bytes());
    OsString::from_vec(command)
}

/// Runs the inspection tool on `key_path` and validates its reply.
pub(crate) fn run(
    tools_config: &KeyTools,
    key_path: &Path,
    algorithm: Algorithm,
    bits: SizeRange,
) -> Result<Fingerprint, KeyError> {
    let unavailable = |reason: String| KeyError::FingerprintUnavailable { algorithm, reason };

    let keygen = tools::program_checked(&tools_config.keygen).map_err(|e| unavailable(e.to_string()))?;
    let spec = SpawnSpec::shell(command_line(&keygen, algorithm, key_path), &tools_config.shell);

    let mut io = ProcessIo::spawn(&spec).map_err(|e| unavailable(e.to_string()))?;
    io.close_write().map_err(|e| unavailable(e.to_string()))?;
    let reply = io.read_line().map_err(|e| unavailable(e.to_string()))?;
    let status = io.wait().map_err(|e| unavailable(e.to_string()))?;

    let Some(reply) = reply else {
        return Err(unavailable(format!("no reply ({status})")));
    };
    debug!(%algorithm, reply = %reply, "fingerprint tool replied");
    parse_reply(&reply, algorithm, bits).map_err(unavailable)
}
