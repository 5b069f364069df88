//! Redacting wrapper for connection strings, client secrets and bearer tokens.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string whose contents never appear in Debug, Display or serialized output.
///
/// Used for `AzureConnectionString` values (which embed client secrets), app
/// keys and access tokens. The memory is zeroed on drop. Read the value with
/// [`SecretString::expose_secret`] only at the point where it is sent over the wire.
///
/// Equality and hashing use the real value, so a `SecretString` can act as a
/// cache key without being printable.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl Hash for SecretString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connection_string_is_redacted() {
        let secret = SecretString::new("RunAs=App;AppId=a;TenantId=t;AppKey=hunter2");

        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
        assert!(secret.expose_secret().contains("hunter2"));
    }

    #[test]
    fn test_equal_values_hash_together() {
        let mut keys = HashSet::new();
        keys.insert(SecretString::new("RunAs=App"));
        keys.insert(SecretString::from("RunAs=App".to_string()));
        keys.insert(SecretString::from("RunAs=App;AppId=other"));

        assert_eq!(keys.len(), 2);
    }
}
