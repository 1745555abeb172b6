//! Protected string values

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string field value that is wiped from memory on drop.
///
/// `protected` decides whether the value is obfuscated with the inner
/// keystream when the document is written.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ProtectedString {
    value: String,
    protected: bool,
}

impl ProtectedString {
    pub fn new(value: impl Into<String>, protected: bool) -> Self {
        Self {
            value: value.into(),
            protected,
        }
    }

    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(value, false)
    }

    pub fn protected(value: impl Into<String>) -> Self {
        Self::new(value, true)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }
}

impl std::fmt::Debug for ProtectedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.protected {
            write!(f, "ProtectedString([REDACTED])")
        } else {
            write!(f, "ProtectedString({:?})", self.value)
        }
    }
}

impl From<&str> for ProtectedString {
    fn from(s: &str) -> Self {
        Self::plain(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_protected() {
        let secret = ProtectedString::protected("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));

        let plain = ProtectedString::plain("visible");
        assert!(format!("{:?}", plain).contains("visible"));
    }

    #[test]
    fn test_zeroize_clears_value() {
        let mut value = ProtectedString::protected("secret");
        value.zeroize();
        assert!(value.is_empty());
        assert!(!value.is_protected());
    }

    #[test]
    fn test_equality_includes_flag() {
        assert_ne!(ProtectedString::plain("a"), ProtectedString::protected("a"));
        assert_eq!(ProtectedString::from("a"), ProtectedString::plain("a"));
    }
}
