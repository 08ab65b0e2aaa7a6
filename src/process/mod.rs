//! Child processes wired to a private pair of pipes.
//!
//! The caller owns both ends exclusively: [`ProcessIo::reader`] yields what
//! the child writes to its standard output and [`ProcessIo::writer`] feeds
//! its standard input. Standard error is inherited.

mod spec;

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus, Stdio};

use thiserror::Error;
use tracing::debug;

pub use spec::SpawnSpec;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{operation}: {source}")]
    Os {
        operation: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} side of the process pipe is closed")]
    Closed(&'static str),
}

impl ProcessError {
    fn os(operation: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let operation = operation.into();
        move |source| ProcessError::Os { operation, source }
    }
}

pub struct ProcessIo {
    child: Child,
    reader: Option<BufReader<ChildStdout>>,
    writer: Option<BufWriter<ChildStdin>>,
}

impl ProcessIo {
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, ProcessError> {
        let program = spec.program_name().to_string_lossy().into_owned();
        debug!(program = %program, use_shell = spec.use_shell, "spawning child process");

        let mut child = spec
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ProcessError::os(format!("spawn({program})")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Os {
                operation: "pipe".to_string(),
                source: io::Error::other("child pipes were not created"),
            });
        };

        Ok(Self {
            child,
            reader: Some(BufReader::new(stdout)),
            writer: Some(BufWriter::new(stdin)),
        })
    }

    /// The child's standard output.
    pub fn reader(&mut self) -> Result<&mut BufReader<ChildStdout>, ProcessError> {
        self.reader.as_mut().ok_or(ProcessError::Closed("read"))
    }

    /// The child's standard input.
    pub fn writer(&mut self) -> Result<&mut BufWriter<ChildStdin>, ProcessError> {
        self.writer.as_mut().ok_or(ProcessError::Closed("write"))
    }

    pub fn close_read(&mut self) {
        self.reader = None;
    }

    /// Flushes and closes the child's standard input so it sees end-of-file.
    pub fn close_write(&mut self) -> Result<(), ProcessError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(ProcessError::os("flush"))?;
        }
        Ok(())
    }

    /// Reads one line without its terminator; `None` at end-of-stream.
    pub fn read_line(&mut self) -> Result<Option<String>, ProcessError> {
        let mut line = Vec::new();
        let n = self
            .reader()?
            .read_until(b'\n', &mut line)
            .map_err(ProcessError::os("read"))?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>, ProcessError> {
        let mut out = Vec::new();
        self.reader()?
            .read_to_end(&mut out)
            .map_err(ProcessError::os("read"))?;
        Ok(out)
    }

    /// Closes both pipes and waits for the child to exit.
    pub fn wait(mut self) -> Result<ExitStatus, ProcessError> {
        let flushed = self.close_write();
        self.close_read();
        let status = self.child.wait().map_err(ProcessError::os("wait"))?;
        flushed.map(|()| status)
    }
}

impl Drop for ProcessIo {
    fn drop(&mut self) {
        self.writer = None;
        self.reader = None;
        let _ = self.child.wait();
    }
}
