//! Input validation primitives.
//!
//! Ergonomic helpers for the argument checks that must happen before any
//! host is contacted.

use crate::error::{Error, Result};

/// Require an Option to contain a value.
pub fn require<T>(opt: Option<T>, field: &str) -> Result<T> {
    opt.ok_or_else(|| Error::validation_missing_argument(vec![field.to_string()]))
}

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// Require a collection to be non-empty.
pub fn require_non_empty_vec<'a, T>(vec: &'a [T], field: &str) -> Result<&'a [T]> {
    if vec.is_empty() {
        Err(Error::validation_missing_argument(vec![field.to_string()]))
    } else {
        Ok(vec)
    }
}
