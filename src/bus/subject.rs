//! Subject names and wildcard matching
//!
//! Subjects are dot-delimited tokens (`kubecon.handoff`). Patterns may use
//! `*` to match exactly one token and a trailing `>` to match one or more
//! remaining tokens (`quickdraw_reply.>`).

use crate::error::{Error, Result};

/// Single-token wildcard
pub const WILDCARD_ONE: &str = "*";

/// Multi-token tail wildcard
pub const WILDCARD_TAIL: &str = ">";

/// Validate a concrete subject (no wildcards allowed)
pub fn validate_subject(subject: &str) -> Result<()> {
    validate(subject, false)
}

/// Validate a subscription pattern (wildcards allowed)
pub fn validate_pattern(pattern: &str) -> Result<()> {
    validate(pattern, true)
}

fn validate(subject: &str, allow_wildcards: bool) -> Result<()> {
    if subject.is_empty() {
        return Err(Error::InvalidSubject(subject.to_string()));
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSubject(subject.to_string()));
        }

        let is_wildcard = *token == WILDCARD_ONE || *token == WILDCARD_TAIL;
        if is_wildcard && !allow_wildcards {
            return Err(Error::InvalidSubject(subject.to_string()));
        }
        if !is_wildcard && (token.contains('*') || token.contains('>')) {
            return Err(Error::InvalidSubject(subject.to_string()));
        }
        // `>` is only meaningful as the last token
        if *token == WILDCARD_TAIL && i != tokens.len() - 1 {
            return Err(Error::InvalidSubject(subject.to_string()));
        }
    }

    Ok(())
}

/// Whether a pattern contains wildcards
pub fn is_wildcard(pattern: &str) -> bool {
    pattern
        .split('.')
        .any(|t| t == WILDCARD_ONE || t == WILDCARD_TAIL)
}

/// Check whether `subject` is matched by `pattern`
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(WILDCARD_TAIL), Some(_)) => return true,
            (Some(WILDCARD_ONE), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Append a token to a subject
pub fn join(prefix: &str, token: &str) -> String {
    format!("{}.{}", prefix, token)
}
