//! Single-quote codec for the restricted shell's command grammar.
//!
//! The restricted shell quotes every path argument as `'...'` and spells an
//! embedded `'` or `!` as `'\''` / `'\!'`. [`dequote`] undoes exactly that
//! quoting and nothing more; [`sq_quote`] produces it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DequoteError {
    #[error("argument does not start with a quote")]
    NotQuoted,
    #[error("unterminated quoted argument")]
    Unterminated,
    #[error("unexpected character after closing quote at offset {offset}")]
    BadContinuation { offset: usize },
}

/// Characters that cannot live inside a single-quoted run and must be
/// spelled as a backslash escape between two runs.
pub fn need_bs_quote(c: u8) -> bool {
    c == b'\'' || c == b'!'
}

// C-locale isspace(); `u8::is_ascii_whitespace` leaves out vertical tab.
fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

/// Dequotes an input that must consist of exactly one quoted token.
pub fn dequote(input: &[u8]) -> Result<Vec<u8>, DequoteError> {
    dequote_inner(input, false).map(|(literal, _)| literal)
}

/// Dequotes the leading token of a whitespace-separated stream of quoted
/// tokens.
///
/// Returns the literal and the remainder after the whitespace run that
/// ended the token, or `None` when the input ended right after the token.
pub fn dequote_step(input: &[u8]) -> Result<(Vec<u8>, Option<&[u8]>), DequoteError> {
    dequote_inner(input, true)
}

fn dequote_inner(input: &[u8], stream: bool) -> Result<(Vec<u8>, Option<&[u8]>), DequoteError> {
    if input.first() != Some(&b'\'') {
        return Err(DequoteError::NotQuoted);
    }

    let mut literal = Vec::with_capacity(input.len());
    let mut pos = 1;

    loop {
        let c = *input.get(pos).ok_or(DequoteError::Unterminated)?;
        pos += 1;

        if c != b'\'' {
            literal.push(c);
            continue;
        }

        // Stepped out of the quoted run.
        let mut check = pos;
        match input.get(pos) {
            None => return Ok((literal, None)),
            Some(b'\\') => match input.get(pos + 1) {
                Some(&escaped) if need_bs_quote(escaped) => {
                    if input.get(pos + 2) == Some(&b'\'') {
                        literal.push(escaped);
                        pos += 3;
                        continue;
                    }
                    check = pos + 2;
                }
                _ => check = pos + 1,
            },
            Some(_) => {}
        }

        // Only whitespace may end a token inside a stream.
        match input.get(check) {
            Some(&c) if stream && is_space(c) => {
                let mut rest = check;
                while input.get(rest).copied().is_some_and(is_space) {
                    rest += 1;
                }
                return Ok((literal, Some(&input[rest..])));
            }
            _ => return Err(DequoteError::BadContinuation { offset: check }),
        }
    }
}

/// Quotes `raw` as one token the restricted shell will dequote back to
/// exactly `raw`.
pub fn sq_quote(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    out.push(b'\'');
    for &c in raw {
        if need_bs_quote(c) {
            out.extend_from_slice(&[b'\'', b'\\', c, b'\'']);
        } else {
            out.push(c);
        }
    }
    out.push(b'\'');
    out
}
