use lazy_static::lazy_static;
use regex::Regex;

use crate::config::AppConfig;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input.
pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

pub(crate) fn validate_name(name: &str) -> Result<String, &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required");
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err("Name is too long");
    }
    Ok(name.to_string())
}

/// Length bounds for new passwords, counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_len: 8,
            max_len: 256,
        }
    }
}

impl From<&AppConfig> for PasswordPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_len: config.password_min_len,
            max_len: config.password_max_len,
        }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), &'static str> {
        if password.is_empty() {
            return Err("Password is required");
        }
        let len = password.chars().count();
        if len < self.min_len {
            return Err("Password too short");
        }
        if len > self.max_len {
            return Err("Password too long");
        }
        Ok(())
    }
}
