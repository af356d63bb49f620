use std::env;
use std::fmt;

use crate::ResearchError;

const FINGERPRINT_TAIL: usize = 4;
const MIN_FINGERPRINT_LEN: usize = 12;

/// A provider API key together with the variable it was read from.
///
/// Neither `Debug` nor [`SecretValue::fingerprint`] reveal more than the
/// vendor prefix and the last few characters.
#[derive(Clone)]
pub struct SecretValue {
    value: String,
    origin: Option<String>,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            origin: None,
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Environment variable the key came from, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Loggable identifier such as `sk-…9f3a` or `tvly-…k2Qz`.
    pub fn fingerprint(&self) -> String {
        let chars: Vec<char> = self.value.chars().collect();
        let prefix: String = match self.value.find('-') {
            Some(dash) if dash <= 4 => self.value[..=dash].to_string(),
            _ => String::new(),
        };
        if chars.len() < MIN_FINGERPRINT_LEN {
            return format!("{prefix}…");
        }
        let tail: String = chars[chars.len() - FINGERPRINT_TAIL..].iter().collect();
        format!("{prefix}…{tail}")
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("origin", &self.origin)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Read a provider key from `var`; unset and blank values are both missing.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue {
            value: value.trim().to_string(),
            origin: Some(var.to_string()),
        }),
        _ => Err(ResearchError::MissingSecret(var.to_string())),
    }
}
