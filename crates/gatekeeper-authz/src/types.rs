//! Strongly typed identifiers used by the decision core.
//!
//! # Key invariants
//! - A [`SubjectId`] is only ever built from a verified token's `sub` claim or
//!   by an identity store keyed on such a value.
//! - `Display` and `as_str` return the original value unchanged.
/// Authenticated subject identifier.
///
/// # Example
/// ```rust
/// use gatekeeper_authz::SubjectId;
///
/// let subject = SubjectId::new("user-42");
/// assert_eq!(subject.as_str(), "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::SubjectId;

    #[test]
    fn subject_id_preserves_value() {
        let subject = SubjectId::from("alice");
        assert_eq!(subject.as_str(), "alice");
        assert_eq!(subject.to_string(), "alice");
        assert_eq!(subject, SubjectId::new("alice".to_string()));
    }
}
