use std::time::Duration;
use thiserror::Error;

/// Failures from [`crate::TokenVerifier::verify`].
///
/// Only the variant matters to the decision core; messages are for server
/// logs and never include token contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed credential: {0}")]
    Malformed(String),
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("credential expired")]
    Expired,
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

/// Failures building verification keys or a verifier.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no verification keys configured")]
    NoKeys,
    #[error("key family {key:?} cannot verify {algorithm:?} tokens")]
    AlgorithmMismatch {
        algorithm: jsonwebtoken::Algorithm,
        key: crate::KeyFamily,
    },
    #[error("invalid key material: {0}")]
    InvalidMaterial(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is outside the protected prefix")]
    OutsidePrefix,
    #[error("path has an empty group segment")]
    EmptyGroup,
    #[error("path has no asset after the group segment")]
    MissingAssetPath,
    #[error("path contains a relative segment")]
    Traversal,
    #[error("path contains a null byte")]
    NulByte,
    #[error("path is not valid percent-encoded utf-8")]
    InvalidEncoding,
    #[error("edge group {hint} does not match path group {derived}")]
    GroupMismatch { hint: String, derived: String },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("identity store lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_part() {
        assert_eq!(
            TokenError::MissingClaim("exp".to_string()).to_string(),
            "missing required claim: exp"
        );
        assert_eq!(
            TokenError::InvalidClaim("nbf".to_string()).to_string(),
            "invalid claim: nbf"
        );
        assert_eq!(
            PathError::GroupMismatch {
                hint: "managers".to_string(),
                derived: "finance".to_string(),
            }
            .to_string(),
            "edge group managers does not match path group finance"
        );
        assert_eq!(
            ResolveError::Timeout(Duration::from_millis(30)).to_string(),
            "identity store lookup timed out after 30ms"
        );
        assert_eq!(
            KeyError::AlgorithmMismatch {
                algorithm: jsonwebtoken::Algorithm::RS256,
                key: crate::KeyFamily::Hmac,
            }
            .to_string(),
            "key family Hmac cannot verify RS256 tokens"
        );
        assert_eq!(
            StoreError::Unavailable("pool timed out".to_string()).to_string(),
            "store unavailable: pool timed out"
        );
    }

    #[test]
    fn unsupported_algorithm_names_the_algorithm() {
        let err = TokenError::UnsupportedAlgorithm("none".to_string());
        assert!(err.to_string().contains("none"));
    }
}
