//! Backslash escaping for interpolating untrusted text into a command line.
//!
//! [`ShellEscape`] wraps any writer and escapes bytes as they pass through,
//! so it can sit in front of incremental output of any chunk size. The
//! escaped form of any byte string is exactly one word to a POSIX shell.

use std::io::{self, Write};

/// Returns `true` for bytes that never need escaping.
pub fn is_safe(b: u8) -> bool {
    matches!(b,
        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'
        | b',' | b'.' | b'_' | b'+' | b':' | b'@' | b'%' | b'/' | b'-')
}

/// Escaping writer.
pub struct ShellEscape<W: Write> {
    inner: W,
}

impl<W: Write> ShellEscape<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ShellEscape<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let run = rest.iter().position(|&b| !is_safe(b)).unwrap_or(rest.len());
            if run > 0 {
                self.inner.write_all(&rest[..run])?;
                rest = &rest[run..];
                continue;
            }

            let b = rest[0];
            if b == b'\n' {
                // Backslash-newline is a line continuation, so quote it instead.
                self.inner.write_all(b"'\n'")?;
            } else {
                self.inner.write_all(&[b'\\', b])?;
            }
            rest = &rest[1..];
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Escapes `raw` into a fresh buffer.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = ShellEscape::new(Vec::with_capacity(raw.len() * 2));
    // Writing into a Vec cannot fail.
    let _ = out.write_all(raw);
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    use proptest::prelude::*;

    use super::*;
    use crate::process::{ProcessIo, SpawnSpec};

    #[test]
    fn safe_text_passes_through() {
        let raw = b"/home/git/alice-0123/project.git";
        assert_eq!(escape(raw), raw.to_vec());
        assert_eq!(escape(b"user@host:1.2,3+4%5_6"), b"user@host:1.2,3+4%5_6".to_vec());
    }

    #[test]
    fn metacharacters_get_a_backslash() {
        assert_eq!(escape(b"a b"), b"a\\ b".to_vec());
        assert_eq!(escape(b"$(id)"), b"\\$\\(id\\)".to_vec());
        assert_eq!(escape(b"it's"), b"it\\'s".to_vec());
        assert_eq!(escape(b";|&"), b"\\;\\|\\&".to_vec());
    }

    #[test]
    fn newline_is_quoted() {
        assert_eq!(escape(b"a\nb"), b"a'\n'b".to_vec());
    }

    #[test]
    fn chunked_writes_match_whole_buffer() {
        let raw = b"/tmp/file with `cmd` and $VAR\n";
        let mut chunked = ShellEscape::new(Vec::new());
        for chunk in raw.chunks(3) {
            chunked.write_all(chunk).unwrap();
        }
        assert_eq!(chunked.into_inner(), escape(raw));
    }

    /// Asks a real shell how many words the escaped text splits into.
    fn shell_words(escaped: &[u8]) -> Vec<u8> {
        let mut command = b"set -- ".to_vec();
        command.extend_from_slice(escaped);
        command.extend_from_slice(b"; printf '%s:%s' \"$#\" \"$1\"");

        let spec = SpawnSpec::shell(OsString::from_vec(command), "/bin/sh");
        let mut io = ProcessIo::spawn(&spec).unwrap();
        io.close_write().unwrap();
        let out = io.read_to_end().unwrap();
        io.wait().unwrap();
        out
    }

    #[test]
    fn shell_sees_one_word() {
        let samples: [&[u8]; 7] = [b"a b", b"*", b"'\"", b"x\ny", b"--help", b"~root", b"#c"];
        for raw in samples {
            let mut expected = b"1:".to_vec();
            expected.extend_from_slice(raw);
            assert_eq!(shell_words(&escape(raw)), expected);
        }
    }

    proptest! {
        #[test]
        fn safe_input_is_unchanged(raw in "[A-Za-z0-9,._+:@%/-]{0,40}") {
            prop_assert_eq!(escape(raw.as_bytes()), raw.as_bytes().to_vec());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn any_ascii_is_one_shell_word(raw in proptest::collection::vec(1u8..=127, 1..24)) {
            let mut expected = b"1:".to_vec();
            expected.extend_from_slice(&raw);
            prop_assert_eq!(shell_words(&escape(&raw)), expected);
        }
    }
}
