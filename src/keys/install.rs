use std::ffi::OsString;
use std::io::Write;
use std::os::unix::ffi::OsStringExt;

use tracing::{debug, info};

use super::{KeyError, KeyTools};
use crate::escape::ShellEscape;
use crate::identity::Identity;
use crate::process::{ProcessIo, SpawnSpec};

/// `<prefix> <identity> <pid>` with both arguments escaped.
fn command_line(prefix: &str, identity: &Identity, pid: u32) -> OsString {
    let mut command = prefix.as_bytes().to_vec();
    let pid = pid.to_string();
    for arg in [identity.as_str(), pid.as_str()] {
        command.push(b' ');
        // Writes into a Vec cannot fail.
        let _ = ShellEscape::new(&mut command).write_all(arg.as_bytes());
    }
    OsString::from_vec(command)
}

/// Runs the configured installation command, if there is one.
pub(crate) fn install_keys(tools: &KeyTools, identity: &Identity) -> Result<(), KeyError> {
    let Some(prefix) = tools.install_keys.as_deref().filter(|p| !p.trim().is_empty()) else {
        debug!("no key installation command configured");
        return Ok(());
    };

    let command = command_line(prefix, identity, std::process::id());
    let mut io = ProcessIo::spawn(&SpawnSpec::shell(command, &tools.shell))
        .map_err(|e| KeyError::Install(e.to_string()))?;
    io.close_write().map_err(|e| KeyError::Install(e.to_string()))?;
    let status = io.wait().map_err(|e| KeyError::Install(e.to_string()))?;

    if !status.success() {
        return Err(KeyError::Install(format!("{prefix}: {status}")));
    }
    info!(identity = %identity, "installed keys");
    Ok(())
}
