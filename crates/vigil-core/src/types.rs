//! Core type definitions with validation.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// OS process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque OS window handle.
///
/// Carries no platform meaning inside the core; it only participates in
/// the (process, handle, title) identity triple of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved application identity.
///
/// Holds the display form (e.g. "Visual Studio Code") alongside a derived
/// lowercase key. Equality and hashing use the key only, so "Chrome" and
/// "CHROME" are one identity while the first-seen display form is kept
/// for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalName {
    display: String,
    key: String,
}

impl CanonicalName {
    /// Display form used when nothing about a window could be resolved.
    pub const UNKNOWN: &'static str = "Unknown";

    /// Display form of the synthetic idle identity.
    pub const IDLE: &'static str = "Idle";

    /// Creates a canonical name after validation.
    pub fn new(display: impl Into<String>) -> Result<Self, ValidationError> {
        let display = display.into();
        let trimmed = display.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty {
                field: "canonical name",
            });
        }
        Ok(Self {
            key: trimmed.to_lowercase(),
            display: trimmed.to_string(),
        })
    }

    /// The fallback identity for unresolvable windows.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            display: Self::UNKNOWN.to_string(),
            key: Self::UNKNOWN.to_lowercase(),
        }
    }

    /// The synthetic identity under which idle spans accrue.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            display: Self::IDLE.to_string(),
            key: Self::IDLE.to_lowercase(),
        }
    }

    /// Returns the display form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Returns the case-insensitive merge key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for CanonicalName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CanonicalName {}

impl Hash for CanonicalName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl TryFrom<String> for CanonicalName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CanonicalName> for String {
    fn from(name: CanonicalName) -> Self {
        name.display
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== CanonicalName Tests ==========

    #[test]
    fn canonical_name_accepts_valid_input() {
        let name = CanonicalName::new("Chrome").unwrap();
        assert_eq!(name.as_str(), "Chrome");
        assert_eq!(name.key(), "chrome");
    }

    #[test]
    fn canonical_name_trims_whitespace() {
        let name = CanonicalName::new("  Chrome  ").unwrap();
        assert_eq!(name.as_str(), "Chrome");
    }

    #[test]
    fn canonical_name_rejects_empty() {
        assert!(CanonicalName::new("").is_err());
        assert!(CanonicalName::new("   ").is_err());
    }

    #[test]
    fn canonical_name_equality_is_case_insensitive() {
        let a = CanonicalName::new("Chrome").unwrap();
        let b = CanonicalName::new("CHROME").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn canonical_name_hashes_by_key() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(CanonicalName::new("chrome").unwrap());
        set.insert(CanonicalName::new("Chrome").unwrap());
        set.insert(CanonicalName::new("CHROME").unwrap());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn canonical_name_serde_round_trip() {
        let name = CanonicalName::new("Visual Studio Code").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"Visual Studio Code\"");

        let back: CanonicalName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert_eq!(back.as_str(), "Visual Studio Code");
    }

    #[test]
    fn canonical_name_deserialize_rejects_empty() {
        let result: Result<CanonicalName, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }

    // ========== Identifier Tests ==========

    #[test]
    fn process_id_display() {
        assert_eq!(ProcessId(4312).to_string(), "4312");
    }

    #[test]
    fn window_handle_is_opaque_value() {
        let a = WindowHandle(0x2600_0004);
        let b = WindowHandle(0x2600_0004);
        assert_eq!(a, b);
        assert_ne!(a, WindowHandle(1));
    }
}
