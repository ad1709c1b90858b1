//! Subject grammar and wildcard matching.
//!
//! Subjects are dotted token strings (`orders.eu.created`). Filter patterns
//! may use `*` to match exactly one token and `>` to match one or more
//! trailing tokens; `>` must be the final token of a pattern. Stream stores
//! use this grammar to validate incoming subjects against configured filters
//! and to answer subject-filtered queries.

use thiserror::Error;

/// Token separator within a subject.
pub const TOKEN_SEPARATOR: char = '.';

/// Wildcard token matching exactly one subject token.
pub const SINGLE_WILDCARD: &str = "*";

/// Wildcard token matching one or more trailing subject tokens.
pub const MULTI_WILDCARD: &str = ">";

/// Validation error for subjects and filter patterns
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    /// The subject or pattern is empty
    #[error("subject cannot be empty")]
    Empty,

    /// A token is empty (leading, trailing or consecutive dots)
    #[error("subject contains an empty token")]
    EmptyToken,

    /// A wildcard is mixed with literal characters inside one token
    #[error("wildcard must be a whole token: {0:?}")]
    PartialWildcard(String),

    /// `>` appears before the final token
    #[error("'>' is only valid as the final token")]
    TrailingWildcardPosition,

    /// A literal subject contains wildcard tokens
    #[error("subject may not contain wildcards: {0:?}")]
    LiteralExpected(String),
}

/// Check whether a subject matches a filter pattern.
///
/// The subject is expected to be a literal; the pattern may contain
/// wildcards. An empty pattern matches nothing — callers that treat an
/// empty filter as "match everything" decide that before calling here.
#[must_use]
pub fn matches_pattern(subject: &str, pattern: &str) -> bool {
    if subject.is_empty() || pattern.is_empty() {
        return false;
    }
    if subject == pattern {
        return true;
    }

    let mut subject_tokens = subject.split(TOKEN_SEPARATOR);
    let mut pattern_tokens = pattern.split(TOKEN_SEPARATOR);
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            // Both exhausted at the same time.
            (None, None) => return true,
            // `>` swallows the rest, but must consume at least one token.
            (Some(MULTI_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_WILDCARD), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            _ => return false,
        }
    }
}

/// Whether a pattern is free of wildcards.
#[must_use]
pub fn is_literal(pattern: &str) -> bool {
    pattern
        .split(TOKEN_SEPARATOR)
        .all(|token| token != SINGLE_WILDCARD && token != MULTI_WILDCARD)
}

/// Validate a filter pattern.
///
/// # Errors
///
/// Returns `SubjectError` if the pattern violates the grammar.
pub fn validate_pattern(pattern: &str) -> Result<(), SubjectError> {
    if pattern.is_empty() {
        return Err(SubjectError::Empty);
    }

    let tokens: Vec<&str> = pattern.split(TOKEN_SEPARATOR).collect();
    for (position, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(SubjectError::EmptyToken);
        }
        if token.len() > 1 && (token.contains('*') || token.contains('>')) {
            return Err(SubjectError::PartialWildcard((*token).to_string()));
        }
        if *token == MULTI_WILDCARD && position != tokens.len() - 1 {
            return Err(SubjectError::TrailingWildcardPosition);
        }
    }

    Ok(())
}

/// Validate a literal subject as carried by a stored message.
///
/// # Errors
///
/// Returns `SubjectError` if the subject is empty, has empty tokens, or
/// contains wildcard tokens.
pub fn validate_literal(subject: &str) -> Result<(), SubjectError> {
    validate_pattern(subject)?;
    if !is_literal(subject) {
        return Err(SubjectError::LiteralExpected(subject.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("orders.new", "orders.new"));
        assert!(!matches_pattern("orders.new", "orders.old"));
        assert!(!matches_pattern("orders.new", "orders"));
        assert!(!matches_pattern("orders", "orders.new"));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(matches_pattern("orders.new", "orders.*"));
        assert!(matches_pattern("orders.old", "*.old"));
        assert!(matches_pattern("a.b.c", "a.*.c"));
        assert!(!matches_pattern("orders.new.item", "orders.*"));
        assert!(!matches_pattern("orders", "orders.*"));
    }

    #[test]
    fn test_multi_wildcard() {
        assert!(matches_pattern("orders.new", "orders.>"));
        assert!(matches_pattern("orders.new.item.urgent", "orders.>"));
        assert!(matches_pattern("orders", ">"));
        assert!(!matches_pattern("users.new", "orders.>"));
        // `>` must match at least one token.
        assert!(!matches_pattern("orders", "orders.>"));
    }

    #[test]
    fn test_combined_wildcards() {
        assert!(matches_pattern("orders.us.new", "orders.*.>"));
        assert!(matches_pattern("orders.us.new.item", "orders.*.>"));
        assert!(!matches_pattern("orders.new", "orders.*.>"));
    }

    #[test]
    fn test_empty_pattern_matches_nothing() {
        assert!(!matches_pattern("orders.new", ""));
        assert!(!matches_pattern("", "orders.new"));
    }

    #[test]
    fn test_is_literal() {
        assert!(is_literal("orders.new"));
        assert!(!is_literal("orders.*"));
        assert!(!is_literal("orders.>"));
        // A wildcard character inside a literal token is not a wildcard.
        assert!(is_literal("orders.a*b"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("orders.*.shipped").is_ok());
        assert!(validate_pattern("orders.>").is_ok());
        assert!(validate_pattern(">").is_ok());
        assert_eq!(validate_pattern(""), Err(SubjectError::Empty));
        assert_eq!(validate_pattern("orders..new"), Err(SubjectError::EmptyToken));
        assert_eq!(validate_pattern(".orders"), Err(SubjectError::EmptyToken));
        assert_eq!(
            validate_pattern("orders.f*o"),
            Err(SubjectError::PartialWildcard("f*o".to_string()))
        );
        assert_eq!(
            validate_pattern("orders.>.new"),
            Err(SubjectError::TrailingWildcardPosition)
        );
    }

    #[test]
    fn test_validate_literal() {
        assert!(validate_literal("orders.new").is_ok());
        assert_eq!(
            validate_literal("orders.*"),
            Err(SubjectError::LiteralExpected("orders.*".to_string()))
        );
    }
}
