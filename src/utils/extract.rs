//! JSON payload extraction from free-form agent replies.
//!
//! Text-completion backends rarely return bare JSON: replies arrive
//! wrapped in markdown fences, prefixed with prose, or trailed by
//! commentary. [`extract_payload`] recovers the payload with a fixed
//! fallback order:
//!
//! 1. fenced blocks tagged `json`, in order of appearance;
//! 2. any other fenced block;
//! 3. the widest `{ … }` slice of the raw text;
//! 4. the widest `[ … ]` slice of the raw text.
//!
//! The first candidate that parses wins. Candidates that fail to parse are
//! skipped, not fatal, so a prose paragraph containing a stray brace does
//! not mask a well-formed fenced block later in the reply.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

const SNIPPET_LEN: usize = 80;

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("no parseable JSON payload in reply starting with: {snippet:?}")]
    #[diagnostic(
        code(waymark::utils::no_payload),
        help("expected a fenced ```json block, a fenced block, or bare braces")
    )]
    NoPayload { snippet: String },
}

/// Pull the first parseable JSON value out of a free-form reply.
pub fn extract_payload(raw: &str) -> Result<Value, ExtractError> {
    let blocks = fenced_blocks(raw);

    for block in &blocks {
        if block.tag.eq_ignore_ascii_case("json")
            && let Ok(value) = serde_json::from_str(block.body.trim())
        {
            return Ok(value);
        }
    }

    for block in &blocks {
        if let Ok(value) = serde_json::from_str(block.body.trim()) {
            return Ok(value);
        }
    }

    if let Some(slice) = widest_slice(raw, '{', '}')
        && let Ok(value) = serde_json::from_str(slice)
    {
        return Ok(value);
    }

    if let Some(slice) = widest_slice(raw, '[', ']')
        && let Ok(value) = serde_json::from_str(slice)
    {
        return Ok(value);
    }

    Err(ExtractError::NoPayload {
        snippet: raw.chars().take(SNIPPET_LEN).collect(),
    })
}

struct FencedBlock<'a> {
    tag: &'a str,
    body: &'a str,
}

/// Collect ``` - fenced blocks. The text on the opening fence line is the
/// tag; an unterminated fence is ignored.
fn fenced_blocks(raw: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else {
            break;
        };
        let block = &after[..end];
        let (tag, body) = match block.find('\n') {
            Some(nl) => (block[..nl].trim(), &block[nl + 1..]),
            None => ("", block),
        };
        blocks.push(FencedBlock { tag, body });
        rest = &after[end + 3..];
    }
    blocks
}

/// Widest substring delimited by `open` … `close`, inclusive.
fn widest_slice(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}
