//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Maximum length of an RFC 1035 label
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a path inside a container
pub const MAX_PATH_LENGTH: usize = 512;

/// Check for an RFC 1035 label: `^[a-z]([-a-z0-9]*[a-z0-9])?$`
#[must_use]
pub fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    name.len() <= MAX_LABEL_LENGTH
        && first.is_ascii_lowercase()
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Check for a C identifier, the shape accepted for environment keys
#[must_use]
pub fn is_c_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check for an absolute path that fits [`MAX_PATH_LENGTH`]
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    path.starts_with('/') && path.len() <= MAX_PATH_LENGTH
}

/// Group identifier with validation
///
/// Scopes the namespace, volume directories and port ledger entries of one
/// group activation, so it must be a DNS label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Name used when a manifest carries no `id`
    pub const DEFAULT: &'static str = "default";

    /// Create a new `GroupName` with validation
    ///
    /// # Errors
    /// Returns error if the name is not an RFC 1035 label
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if !is_dns_label(&name) {
            return Err(ValidationError::InvalidName {
                field: "id".to_string(),
                value: name,
            });
        }
        Ok(Self(name))
    }

    /// Get the group name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GroupName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupName {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, ValidationError> {
        Self::new(s)
    }
}

impl From<GroupName> for String {
    fn from(name: GroupName) -> Self {
        name.0
    }
}

/// Driver-assigned container reference
///
/// Opaque to the core; the Docker driver stores the container ID here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Wrap a driver reference
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_label() {
        for bad in ["", "1", "123", "123abc", "a_b", "a:b", "a b", "A.B", "ab-", "Abc"] {
            assert!(!is_dns_label(bad), "{bad:?} should be rejected");
        }
        for good in ["a", "abc", "abc123", "abc123def", "abc-123-def"] {
            assert!(is_dns_label(good), "{good:?} should be accepted");
        }
        assert!(is_dns_label(&"a".repeat(63)));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn test_c_identifier() {
        assert!(is_c_identifier("KEY"));
        assert!(is_c_identifier("_private"));
        assert!(is_c_identifier("a1_B2"));
        assert!(!is_c_identifier(""));
        assert!(!is_c_identifier("1abc"));
        assert!(!is_c_identifier("a-b"));
        assert!(!is_c_identifier("a b"));
    }

    #[test]
    fn test_valid_path() {
        assert!(is_valid_path("/"));
        assert!(is_valid_path("/foo/bar"));
        assert!(!is_valid_path("foo/bar"));
        assert!(!is_valid_path(""));
        assert!(is_valid_path(&format!("/{}", "a".repeat(511))));
        assert!(!is_valid_path(&format!("/{}", "a".repeat(512))));
    }

    #[test]
    fn test_group_name_serde() {
        let name = GroupName::new("web-tier").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"web-tier\"");
        let back: GroupName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, back);

        assert!(serde_json::from_str::<GroupName>("\"Bad_Name\"").is_err());
    }
}
