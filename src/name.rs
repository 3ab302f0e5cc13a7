// Copyright 2025 NexusVPN Contributors
// SPDX-License-Identifier: Apache-2.0

//! The single gate between untrusted names and privileged command lines.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Characters allowed in usernames and domains. Anything else is rejected
/// before the value can reach an argv, a filesystem path or a DN field.
static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("invalid name regex"));

/// Validate an externally supplied name (username or domain).
///
/// Returns the name unchanged on success so call sites can validate inline:
/// `let user = validate_name(user)?;`
///
/// # Errors
/// Returns [`Error::InvalidName`] for empty strings and for any string
/// containing characters outside `[A-Za-z0-9._-]`.
pub fn validate_name(name: &str) -> Result<&str> {
    if name.is_empty() || !NAME_REGEX.is_match(name) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(name)
}
