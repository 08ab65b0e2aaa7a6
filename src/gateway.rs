//! Restricted command gateway.
//!
//! `sshd` runs the account's shell as `<shell> -c "<command>"`. The gateway
//! accepts exactly one command shape, `<git verb> '<path>'`, checks that the
//! bound identity owns the repository, and hands a freshly quoted command to
//! the real restricted shell. Every step either advances or rejects; there
//! are no retries.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{error, info};

use crate::arch::{paths, tools};
use crate::config::{Config, SizeRange};
use crate::identity::{Identity, IdentityError};
use crate::metadata::MetadataStore;
use crate::quote::{self, DequoteError};

/// Exit status for every validation or authorization rejection.
pub const EXIT_REJECTED: i32 = 1;
/// Exit status when control could not be handed to the restricted shell.
pub const EXIT_EXEC_FAILED: i32 = 2;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing/invalid identity binding: {0}")]
    InvalidIdentity(#[from] IdentityError),
    #[error("arguments don't seem to be shell commands")]
    NotShellCommand,
    #[error("only git commands are supported ({0})")]
    UnsupportedCommand(String),
    #[error("failed to read the command argument")]
    MissingArgument,
    #[error("failed to dequote the repository path: {0}")]
    Dequote(#[from] DequoteError),
    #[error("invalid repository path")]
    InvalidPath,
    /// Covers both a missing repository and one owned by someone else.
    #[error("repository not found or access denied")]
    Unauthorized,
    #[error(transparent)]
    Tool(#[from] tools::ToolError),
    #[error("exec {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl GatewayError {
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::Tool(_) | GatewayError::Exec { .. } => EXIT_EXEC_FAILED,
            _ => EXIT_REJECTED,
        }
    }
}

/// The git wire protocol commands the gateway forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// push
    ReceivePack,
    /// fetch
    UploadPack,
    /// archive
    UploadArchive,
}

impl Verb {
    pub const ALL: [Verb; 3] = [Verb::ReceivePack, Verb::UploadPack, Verb::UploadArchive];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::ReceivePack => "git-receive-pack",
            Verb::UploadPack => "git-upload-pack",
            Verb::UploadArchive => "git-upload-archive",
        }
    }

    pub fn parse(token: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str().as_bytes() == token)
    }
}

/// One inbound command after parsing, before the ownership check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInvocation {
    pub identity: Identity,
    pub verb: Verb,
    /// Dequoted path exactly as the client sent it.
    pub path: Vec<u8>,
}

/// An invocation the identity is allowed to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Approved {
    pub identity: Identity,
    pub verb: Verb,
    pub repo_dir: PathBuf,
}

impl Approved {
    /// `<verb> '<repo_dir>'`, quoted the way the restricted shell dequotes.
    pub fn command_line(&self) -> OsString {
        let mut line = self.verb.as_str().as_bytes().to_vec();
        line.push(b' ');
        line.extend_from_slice(&quote::sq_quote(self.repo_dir.as_os_str().as_bytes()));
        OsString::from_vec(line)
    }
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

fn skip_space(text: &[u8]) -> &[u8] {
    let start = text.iter().position(|&c| !is_space(c)).unwrap_or(text.len());
    &text[start..]
}

/// Binds the identity; only the size range and alphabet are checked here.
pub fn validate_identity(raw: Option<&OsStr>, size: SizeRange) -> Result<Identity, GatewayError> {
    let raw = raw.ok_or(IdentityError::Missing)?;
    let raw = raw.to_str().ok_or(IdentityError::Alphabet)?;
    Ok(Identity::bind(raw, size)?)
}

impl PendingInvocation {
    /// Accepts exactly `["-c", "<verb> '<path>'"]`.
    pub fn parse(identity: Identity, args: &[OsString]) -> Result<Self, GatewayError> {
        let [flag, command] = args else {
            return Err(GatewayError::NotShellCommand);
        };
        if flag != "-c" {
            return Err(GatewayError::NotShellCommand);
        }

        let text = skip_space(command.as_bytes());
        let verb_end = text.iter().position(|&c| is_space(c)).unwrap_or(text.len());
        let (token, rest) = text.split_at(verb_end);

        let verb = Verb::parse(token).ok_or_else(|| {
            GatewayError::UnsupportedCommand(String::from_utf8_lossy(token).into_owned())
        })?;

        let quoted = skip_space(rest);
        if quoted.is_empty() {
            return Err(GatewayError::MissingArgument);
        }

        let path = quote::dequote(quoted)?;
        if path.is_empty() || paths::has_parent_component(&path) {
            return Err(GatewayError::InvalidPath);
        }

        Ok(Self { identity, verb, path })
    }
}

pub struct CommandGateway<S> {
    base_path: PathBuf,
    identity_size: SizeRange,
    git_shell: String,
    store: S,
}

impl<S: MetadataStore> CommandGateway<S> {
    pub fn new(config: &Config, store: S) -> Self {
        Self {
            base_path: config.base_path.clone(),
            identity_size: config.identity_size,
            git_shell: config.git_shell.clone(),
            store,
        }
    }

    /// Runs every check up to, but not including, the hand-off.
    pub fn authorize(
        &self,
        identity: Option<&OsStr>,
        args: &[OsString],
    ) -> Result<Approved, GatewayError> {
        let identity = validate_identity(identity, self.identity_size)?;
        let pending = PendingInvocation::parse(identity, args)?;
        self.authorize_ownership(pending)
    }

    fn authorize_ownership(&self, pending: PendingInvocation) -> Result<Approved, GatewayError> {
        let repo_dir = paths::repository_dir(&self.base_path, &pending.path);

        let record = self.store.load(&repo_dir).map_err(|e| {
            info!(identity = %pending.identity, error = %e, "metadata lookup failed");
            GatewayError::Unauthorized
        })?;

        if record.owner != pending.identity.as_str() {
            info!(
                identity = %pending.identity,
                repo = %repo_dir.display(),
                "identity does not own repository"
            );
            return Err(GatewayError::Unauthorized);
        }

        Ok(Approved {
            identity: pending.identity,
            verb: pending.verb,
            repo_dir,
        })
    }

    /// Replaces the current process with the restricted shell. Returns only
    /// on failure.
    pub fn reinvoke(&self, approved: &Approved) -> GatewayError {
        let program = match tools::program_checked(&self.git_shell) {
            Ok(p) => p,
            Err(e) => return e.into(),
        };
        info!(
            identity = %approved.identity,
            verb = approved.verb.as_str(),
            repo = %approved.repo_dir.display(),
            "forwarding to restricted shell"
        );

        let source = Command::new(&program)
            .arg("-c")
            .arg(approved.command_line())
            .exec();
        GatewayError::Exec {
            program: display_program(&program),
            source,
        }
    }

    /// The whole entry point: authorize, then hand off. Returns the exit
    /// status to use when the hand-off did not happen.
    pub fn run(&self, identity: Option<&OsStr>, args: &[OsString]) -> i32 {
        let err = match self.authorize(identity, args) {
            Ok(approved) => self.reinvoke(&approved),
            Err(e) => e,
        };

        match &err {
            GatewayError::Tool(_) | GatewayError::Exec { .. } => error!(error = %err, "hand-off failed"),
            _ => info!(error = %err, "command rejected"),
        }
        eprintln!("{err}");
        err.exit_code()
    }
}

fn display_program(program: &Path) -> String {
    program.display().to_string()
}
