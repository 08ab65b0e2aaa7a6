use std::path::PathBuf;

use tracing::warn;

use crate::arch::tools;

/// The system shell for shell-mode child processes.
///
/// Prefers the configured shell; falls back to `sh` on `PATH` and finally
/// to `/bin/sh`. The login shell from the environment is never consulted,
/// since for a restricted account that is the gateway itself.
pub fn shell_program(configured: &str) -> PathBuf {
    match tools::program_checked(configured) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "configured shell unavailable, falling back to sh");
            tools::program_checked("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"))
        }
    }
}
