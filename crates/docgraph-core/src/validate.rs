//! Identifier validation for tokens that must appear literally in statements.
//!
//! Relationship types and labels cannot be bound as parameters, so they are
//! restricted to `[A-Z0-9_]+` before any statement is built.

use crate::error::{DocGraphError, DocGraphResult};

/// Relationship-type and label identifiers: uppercase letters, digits, underscore.
pub fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

pub fn validate_identifier(what: &str, s: &str) -> DocGraphResult<()> {
    if is_valid_identifier(s) {
        Ok(())
    } else {
        Err(DocGraphError::validation(format!(
            "invalid {} '{}': use only uppercase letters, digits and underscore",
            what, s
        )))
    }
}

/// Base node label and key property: a letter followed by letters, digits or underscore.
pub fn is_valid_schema_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
