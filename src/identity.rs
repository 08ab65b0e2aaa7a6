//! The caller's identity, bound from a trusted source outside the command text.

use std::fmt;

use thiserror::Error;

use crate::config::SizeRange;

/// Environment variable the account's `authorized_keys` entries set.
pub const IDENTITY_ENV: &str = "GJUSER";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("missing identity binding")]
    Missing,
    #[error("identity must be {}-{} characters", range.min, range.max)]
    Size { range: SizeRange },
    #[error("identity contains invalid characters")]
    Alphabet,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn bind(raw: &str, size: SizeRange) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::Missing);
        }
        if !size.contains(raw.len()) {
            return Err(IdentityError::Size { range: size });
        }
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        if !raw.chars().all(valid_char) || raw.starts_with(['-', '.']) {
            return Err(IdentityError::Alphabet);
        }
        Ok(Self(raw.to_string()))
    }

    /// Binds the identity from [`IDENTITY_ENV`].
    pub fn from_env(size: SizeRange) -> Result<Self, IdentityError> {
        let raw = std::env::var_os(IDENTITY_ENV).ok_or(IdentityError::Missing)?;
        let raw = raw.into_string().map_err(|_| IdentityError::Alphabet)?;
        Self::bind(&raw, size)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: SizeRange = SizeRange::new(3, 8);

    #[test]
    fn binds_valid_identity() {
        assert_eq!(Identity::bind("alice", RANGE).unwrap().as_str(), "alice");
        assert_eq!(Identity::bind("bob", RANGE).unwrap().to_string(), "bob");
    }

    #[test]
    fn rejects_by_size() {
        assert_eq!(Identity::bind("", RANGE), Err(IdentityError::Missing));
        assert_eq!(Identity::bind("al", RANGE), Err(IdentityError::Size { range: RANGE }));
        assert_eq!(Identity::bind("alexandra", RANGE), Err(IdentityError::Size { range: RANGE }));
    }

    #[test]
    fn rejects_by_alphabet() {
        for raw in ["a b", "al@ce", "al/ce", "-alice", ".alice", "al'ce"] {
            assert_eq!(Identity::bind(raw, RANGE), Err(IdentityError::Alphabet), "{raw}");
        }
    }
}
