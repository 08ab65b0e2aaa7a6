use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Used when neither `--config` nor `GJ_CONFIG` names a file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/git-junction/config.json";

/// Key storage area of one identity.
pub fn keys_dir(keys_root: &Path, identity: &str) -> PathBuf {
    keys_root.join(identity)
}

/// Repository directory for a dequoted client path.
///
/// The client path is appended to `base`, not joined, so an absolute client
/// path still lands under `base`.
pub fn repository_dir(base: &Path, dequoted: &[u8]) -> PathBuf {
    let mut raw = base.as_os_str().as_bytes().to_vec();
    if !dequoted.starts_with(b"/") {
        raw.push(b'/');
    }
    raw.extend_from_slice(dequoted);
    PathBuf::from(OsStr::from_bytes(&raw))
}

/// True if any component of `path` walks upwards.
pub fn has_parent_component(path: &[u8]) -> bool {
    Path::new(OsStr::from_bytes(path))
        .components()
        .any(|c| c == Component::ParentDir)
}
