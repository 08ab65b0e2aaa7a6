//! Field validation and the prompt/retry loop.
//!
//! Every field kind maps to one pure validator through [`FieldKind::validator`].
//! A validator returns the normalized value or the message to show before
//! asking again.

use std::io::{self, BufRead, Write};

use base64::Engine as _;
use thiserror::Error;

use crate::config::SizeRange;
use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input aborted")]
    Aborted,
    #[error("writing prompt: {0}")]
    Output(#[source] io::Error),
}

/// Key type token that may precede pasted key data.
pub const KEY_TYPE: &str = "ssh-rsa";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Identity,
    Label,
    KeyData,
    KeyIndex,
    YesNo,
}

/// Limits the validators check against.
#[derive(Clone, Debug)]
pub struct FieldContext<'a> {
    pub identity_size: SizeRange,
    pub label_max: usize,
    pub key_data_sizes: &'a [usize],
    /// Number of keys a 1-based index may point at.
    pub key_count: usize,
}

pub type Validator = fn(&str, &FieldContext<'_>) -> Result<String, String>;

impl FieldKind {
    pub fn validator(self) -> Validator {
        match self {
            FieldKind::Identity => accept_identity,
            FieldKind::Label => accept_label,
            FieldKind::KeyData => accept_key_data,
            FieldKind::KeyIndex => accept_key_index,
            FieldKind::YesNo => accept_yes_or_no,
        }
    }
}

pub fn validate(kind: FieldKind, input: &str, ctx: &FieldContext<'_>) -> Result<String, String> {
    (kind.validator())(input, ctx)
}

fn accept_identity(input: &str, ctx: &FieldContext<'_>) -> Result<String, String> {
    Identity::bind(input, ctx.identity_size)
        .map(|id| id.as_str().to_string())
        .map_err(|e| e.to_string())
}

fn label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// True if `label` is an acceptable key label.
pub fn label_valid(label: &str, max: usize) -> bool {
    label.len() <= max && label.chars().all(label_char)
}

fn accept_label(input: &str, ctx: &FieldContext<'_>) -> Result<String, String> {
    if input.len() > ctx.label_max {
        return Err(format!("too long, 0-{} characters", ctx.label_max));
    }
    if !input.chars().all(label_char) {
        return Err("invalid character(s), only a-z, A-Z, 0-9 and '-' allowed".to_string());
    }
    Ok(input.to_string())
}

/// True if `token` is acceptable stored key material.
pub fn key_data_valid(token: &str, sizes: &[usize]) -> bool {
    sizes.contains(&token.len())
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        && base64::engine::general_purpose::STANDARD.decode(token).is_ok()
}

/// Reduces pasted key material to its bare base64 token: leading
/// whitespace, any leading key type and a trailing comment are dropped.
/// An empty result means nothing was entered.
pub fn normalize_key_data(input: &str, sizes: &[usize]) -> Result<String, String> {
    let mut rest = input.trim_start();
    while let Some(stripped) = rest.strip_prefix(KEY_TYPE) {
        rest = stripped.trim_start();
    }

    let Some(token) = rest.split_whitespace().next() else {
        return Ok(String::new());
    };

    if !sizes.contains(&token.len()) {
        return Err("invalid key length".to_string());
    }
    if !key_data_valid(token, sizes) {
        return Err("invalid key content".to_string());
    }
    Ok(token.to_string())
}

fn accept_key_data(input: &str, ctx: &FieldContext<'_>) -> Result<String, String> {
    normalize_key_data(input, ctx.key_data_sizes)
}

fn accept_key_index(input: &str, ctx: &FieldContext<'_>) -> Result<String, String> {
    match input.trim().parse::<usize>() {
        Ok(n) if (1..=ctx.key_count).contains(&n) => Ok(n.to_string()),
        _ if ctx.key_count == 0 => Err("no keys to remove".to_string()),
        _ => Err(format!("invalid key index, 1-{}", ctx.key_count)),
    }
}

fn accept_yes_or_no(input: &str, _ctx: &FieldContext<'_>) -> Result<String, String> {
    match input.to_ascii_lowercase().as_str() {
        answer @ ("yes" | "no") => Ok(answer.to_string()),
        _ => Err("answer yes or no".to_string()),
    }
}

/// Prompts until `kind` accepts a line.
///
/// End-of-input or a failed read ends the session with
/// [`InputError::Aborted`]; it is never retried.
pub fn read_field<R, W>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    kind: FieldKind,
    ctx: &FieldContext<'_>,
) -> Result<String, InputError>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(output, "{prompt}").map_err(InputError::Output)?;
        output.flush().map_err(InputError::Output)?;

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => {
                let _ = writeln!(output);
                return Err(InputError::Aborted);
            }
            Ok(_) => {}
        }
        let line: String = line.chars().filter(|c| !c.is_ascii_control()).collect();

        match validate(kind, &line, ctx) {
            Ok(value) => return Ok(value),
            Err(message) => writeln!(output, "{message}").map_err(InputError::Output)?,
        }
    }
}
