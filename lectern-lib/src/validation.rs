//! Input checks applied before anything reaches the repositories.
//!
//! Emails are the identity key shared by profiles and accounts, so every email that enters the
//! system passes through [`normalize_email`] first. Comparisons elsewhere assume that has
//! already happened.

use std::sync::LazyLock;

use crate::Error;

static EMAIL_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)*[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
    )
    .expect("EMAIL_REGEX is a valid regex pattern")
});

/// Maximum allowed email length (per RFC 5321).
const MAX_EMAIL_LENGTH: usize = 254;

/// Trim and lowercase an email so that it can be used as an identity key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize `email` and reject it if it's missing or malformed.
pub fn validate_email(email: &str) -> Result<String, Error> {
    let email = normalize_email(email);

    if email.is_empty() {
        return Err(Error::Validation("email is required".into()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(Error::Validation(format!(
            "email must be at most {MAX_EMAIL_LENGTH} characters"
        )));
    }

    if !EMAIL_REGEX.is_match(&email) {
        return Err(Error::Validation(format!("'{email}' is not a valid email")));
    }

    Ok(email)
}

/// Reject passwords shorter than `min_len` characters.
pub fn validate_password(password: &str, min_len: usize) -> Result<(), Error> {
    if password.chars().count() < min_len {
        return Err(Error::Validation(format!(
            "password must be at least {min_len} characters"
        )));
    }

    Ok(())
}

/// The part of an email before the `@`.
pub fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}
