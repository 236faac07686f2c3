//! Coerces the free text returned by the language model into [`Record`]s.
//!
//! The model is asked for a bare JSON array but routinely wraps it in a code
//! fence, surrounds it with prose, or emits JavaScript-flavoured JSON. Parsing
//! goes through four steps:
//!
//! 1. strip an opening fence (with optional language tag) and a trailing fence
//! 2. slice from the first `[` to the last `]`
//! 3. strict `serde_json` parse
//! 4. on failure, repair trailing commas, bare keys and single quotes, then parse again

use serde::Deserialize;
use thiserror::Error;

use crate::error::AppError;
use crate::models::{Record, Scalar};

const FENCE: &str = "```";
const SNIPPET_CHARS: usize = 500;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct MalformedResponse {
    pub reason: String,
    /// Leading part of the model output, kept for diagnostics.
    pub raw: String,
}

impl MalformedResponse {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

impl From<MalformedResponse> for AppError {
    fn from(err: MalformedResponse) -> Self {
        AppError::MalformedResponse {
            reason: err.reason,
            raw: err.raw,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPair {
    name: Option<Scalar>,
    imei: Option<Scalar>,
}

pub fn parse_records(raw: &str) -> Result<Vec<Record>, MalformedResponse> {
    let unfenced = strip_code_fence(raw);
    let candidate = slice_array(unfenced)
        .ok_or_else(|| MalformedResponse::new("no JSON array found in model response", raw))?;

    let pairs: Vec<RawPair> = match serde_json::from_str(candidate) {
        Ok(pairs) => pairs,
        Err(strict_err) => {
            tracing::debug!(error = %strict_err, "Strict parse failed, attempting repair");
            let repaired = repair_json(candidate);
            serde_json::from_str(&repaired).map_err(|e| {
                MalformedResponse::new(
                    format!("model response is not a valid record array: {}", e),
                    raw,
                )
            })?
        }
    };

    pairs
        .into_iter()
        .enumerate()
        .map(|(index, pair)| {
            let imei = required_field(pair.imei, "imei", index, raw)?;
            let name = required_field(pair.name, "name", index, raw)?;
            Ok(Record { imei, name })
        })
        .collect()
}

fn required_field(
    value: Option<Scalar>,
    field: &str,
    index: usize,
    raw: &str,
) -> Result<String, MalformedResponse> {
    match value.map(Scalar::into_string) {
        Some(text) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(MalformedResponse::new(
            format!("element {} has an empty '{}'", index, field),
            raw,
        )),
        None => Err(MalformedResponse::new(
            format!("element {} is missing '{}'", index, field),
            raw,
        )),
    }
}

/// Removes an opening fence with its language tag and a single closing fence.
pub fn strip_code_fence(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix(FENCE) {
        // an optional language tag directly after the marker; content may share the line
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        text = rest[tag_len..].trim_start();
    }
    if let Some(rest) = text.trim_end().strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

/// The text between the first `[` and the last `]`, inclusive.
pub fn slice_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Best-effort rewrite of relaxed JSON into strict JSON.
///
/// Handles trailing commas before `]`/`}`, unquoted object keys and
/// single-quoted strings. Anything else passes through untouched.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                i = copy_double_quoted(&chars, i, &mut out);
                continue;
            }
            '\'' => {
                i = convert_single_quoted(&chars, i, &mut out);
                continue;
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some(']') | Some('}')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

// Returns the index just past the closing quote.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if c == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        i += 1;
        if c == '"' {
            break;
        }
    }
    i
}

fn convert_single_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                if chars[i + 1] == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(chars[i + 1]);
                }
                i += 2;
                continue;
            }
            '\'' => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
        i += 1;
    }
    out.push('"');
    i
}
