use std::ffi::{OsStr, OsString};
use std::process::Command;

/// What to start on the far side of a [`ProcessIo`](super::ProcessIo) pipe pair.
#[derive(Clone, Debug)]
pub struct SpawnSpec {
    /// A full command line when `use_shell` is set, otherwise a program path.
    pub command: OsString,
    pub use_shell: bool,
    /// The system shell that interprets `command` in shell mode.
    pub shell: OsString,
}

impl SpawnSpec {
    /// Run `command` as `<shell> -c <command>`.
    pub fn shell(command: impl Into<OsString>, shell: impl Into<OsString>) -> Self {
        Self {
            command: command.into(),
            use_shell: true,
            shell: shell.into(),
        }
    }

    /// Execute `path` directly, with no arguments.
    pub fn program(path: impl Into<OsString>) -> Self {
        Self {
            command: path.into(),
            use_shell: false,
            shell: OsString::new(),
        }
    }

    /// The program that is actually executed.
    pub fn program_name(&self) -> &OsStr {
        if self.use_shell {
            &self.shell
        } else {
            &self.command
        }
    }

    pub(crate) fn to_command(&self) -> Command {
        if self.use_shell {
            let mut cmd = Command::new(&self.shell);
            cmd.arg("-c").arg(&self.command);
            cmd
        } else {
            Command::new(&self.command)
        }
    }
}
