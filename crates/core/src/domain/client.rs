use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// National identity number used as the client key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    /// Accepts 7 or 8 digits, tolerating dot or space thousands separators
    /// ("12.345.678").
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ' ') {
            return None;
        }

        let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
        if (7..=8).contains(&digits.len()) {
            Some(Self(digits))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub channel_address: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn register(
        id: ClientId,
        name: &str,
        channel_address: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = validate_display_name(name)?;
        Ok(Self { id, name, channel_address: channel_address.into(), email: None, created_at: now })
    }

    pub fn needs_email(&self) -> bool {
        self.email.is_none()
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

pub fn validate_display_name(input: &str) -> Result<String, DomainError> {
    let name = crate::text::squash_whitespace(input);
    let letters = name.chars().filter(|ch| ch.is_alphabetic()).count();
    if letters < 2 {
        return Err(DomainError::Validation("name must contain at least two letters".to_owned()));
    }
    if name.chars().any(|ch| ch.is_ascii_digit()) {
        return Err(DomainError::Validation("name must not contain digits".to_owned()));
    }
    if name.chars().count() > 80 {
        return Err(DomainError::Validation("name must be at most 80 characters".to_owned()));
    }
    Ok(name)
}

/// Shape check only: one `@`, non-empty local part, dotted domain.
pub fn validate_email(input: &str) -> Result<String, DomainError> {
    let email = input.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(DomainError::Validation(format!("`{}` is not a valid email address", input.trim())))
    }
}
