//! Per-user directory names derived from a secret through a digest tool.

use std::io::{self, Write};

use thiserror::Error;
use tracing::debug;

use crate::arch::tools::{self, ToolError};
use crate::config::Config;
use crate::identity::Identity;
use crate::process::{ProcessError, ProcessIo, SpawnSpec};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("feeding digest tool: {0}")]
    Feed(#[source] io::Error),
    #[error("digest tool produced a {found}-character digest, expected {expected}")]
    DigestSize { expected: usize, found: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DigestSizes {
    /// Characters of digest kept in the name.
    pub keep: usize,
    /// Exact length the tool must produce.
    pub expected: usize,
}

impl DigestSizes {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep: config.hash_size,
            expected: config.hashsum_result_size,
        }
    }
}

/// Returns `<identity>-<digest prefix>`.
///
/// The tool runs without a shell, reads `<salt><identity><secret>\n` and
/// must answer with the digest as the first space-separated token.
pub fn directory_name(
    identity: &Identity,
    secret: &str,
    hashsum: &str,
    salt: &str,
    sizes: DigestSizes,
) -> Result<String, LoginError> {
    let program = tools::program_checked(hashsum)?;
    let mut io = ProcessIo::spawn(&SpawnSpec::program(program))?;

    writeln!(io.writer()?, "{salt}{identity}{secret}").map_err(LoginError::Feed)?;
    io.close_write()?;
    let reply = io.read_line()?.unwrap_or_default();
    let status = io.wait()?;

    let digest = reply.split(' ').next().unwrap_or_default();
    if digest.len() != sizes.expected {
        debug!(%status, found = digest.len(), "unexpected digest tool reply");
        return Err(LoginError::DigestSize {
            expected: sizes.expected,
            found: digest.len(),
        });
    }

    let kept = digest.get(..sizes.keep).unwrap_or(digest);
    Ok(format!("{identity}-{kept}"))
}
