use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{name} not found at path: {path}")]
    NotFoundAt { name: String, path: String },
    #[error("{0} not found on PATH")]
    NotOnPath(String),
}

/// Resolve a configured tool and fail if it is not available.
///
/// A name containing `/` is taken as a path and must exist; a bare name is
/// looked up on `PATH`.
pub fn program_checked(name: &str) -> Result<PathBuf, ToolError> {
    let name = name.trim();

    if name.contains('/') {
        if Path::new(name).exists() {
            return Ok(PathBuf::from(name));
        }
        return Err(ToolError::NotFoundAt {
            name: file_name(name),
            path: name.to_string(),
        });
    }

    which::which(name).map_err(|_| ToolError::NotOnPath(name.to_string()))
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_must_exist() {
        assert_eq!(program_checked("/bin/sh").unwrap(), PathBuf::from("/bin/sh"));
        assert!(matches!(
            program_checked("/nonexistent/ssh-keygen"),
            Err(ToolError::NotFoundAt { name, .. }) if name == "ssh-keygen"
        ));
    }

    #[test]
    fn bare_name_is_looked_up_on_path() {
        assert!(program_checked("sh").unwrap().is_absolute());
        assert!(matches!(
            program_checked("gj-no-such-tool"),
            Err(ToolError::NotOnPath(_))
        ));
    }
}
