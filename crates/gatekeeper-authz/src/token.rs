//! Bearer token verification.
//!
//! # Purpose
//! Validates a JWT against the deployment's configured key material and a
//! single pinned algorithm, then extracts the claims the decision core needs.
//!
//! # Key invariants
//! - The header `alg` must equal the configured algorithm. `none`, other
//!   families, and other sizes of the same family are all rejected before any
//!   key is touched.
//! - Every key handed to a [`TokenVerifier`] belongs to the family of its
//!   algorithm; this is checked once at construction.
//! - `exp` and `sub` are mandatory. Expiry is reported separately from
//!   signature failure. A present `nbf` must not lie in the future.
//!
//! # Security model
//! Claims decoded from an unverified token are never returned. The only
//! pre-verification read is the header, used to pin the algorithm and order
//! keys by `kid`.
use crate::{KeyError, SubjectId, TokenError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::str::FromStr;

const DEFAULT_GROUPS_CLAIM: &str = "groups";

/// Key family an algorithm (or a key) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    pub fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Ed,
        }
    }
}

/// Public (or shared) key material used to check token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    family: KeyFamily,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs, shared secrets in particular.
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Shared secret for the HS* algorithms.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            kid: None,
            family: KeyFamily::Hmac,
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// PEM-encoded public key for an asymmetric algorithm.
    ///
    /// # Errors
    /// - `KeyError::InvalidMaterial` for HS* algorithms, which take a secret.
    /// - `KeyError::Jwt` when the PEM cannot be parsed for the family.
    pub fn from_pem(algorithm: Algorithm, pem: &[u8]) -> Result<Self, KeyError> {
        let family = KeyFamily::of(algorithm);
        let decoding_key = match family {
            KeyFamily::Hmac => {
                return Err(KeyError::InvalidMaterial(
                    "shared-secret algorithms do not take a PEM key".to_string(),
                ));
            }
            KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem)?,
            KeyFamily::Ec => DecodingKey::from_ec_pem(pem)?,
            KeyFamily::Ed => DecodingKey::from_ed_pem(pem)?,
        };
        Ok(Self {
            kid: None,
            family,
            decoding_key,
        })
    }

    /// Key from a JWK entry; the JWK `kid` is kept for header-guided lookup.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let family = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
            AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
            AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Ed,
            AlgorithmParameters::OctetKey(_) => KeyFamily::Hmac,
        };
        Ok(Self {
            kid: jwk.common.key_id.clone(),
            family,
            decoding_key: DecodingKey::from_jwk(jwk)?,
        })
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }
}

/// Claims extracted from a token whose signature and expiry were checked.
///
/// Only [`TokenVerifier::verify`] should produce these outside of tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub subject_id: SubjectId,
    pub issued_at: Option<i64>,
    pub expires_at: i64,
    /// Inline group membership, present only when the issuer embeds it.
    pub groups: Option<Vec<String>>,
}

/// Verifier pinned to one algorithm and an immutable key set.
///
/// Built once at startup and shared behind an `Arc`; it holds no interior
/// mutability, so concurrent `verify` calls need no locking.
pub struct TokenVerifier {
    algorithm: Algorithm,
    keys: Vec<VerificationKey>,
    validation: Validation,
    groups_claim: String,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithm", &self.algorithm)
            .field("keys", &self.keys)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier for `algorithm` over `keys`.
    ///
    /// # Errors
    /// - `KeyError::NoKeys` when `keys` is empty.
    /// - `KeyError::AlgorithmMismatch` when a key belongs to another family.
    pub fn new(algorithm: Algorithm, keys: Vec<VerificationKey>) -> Result<Self, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::NoKeys);
        }
        let family = KeyFamily::of(algorithm);
        if let Some(key) = keys.iter().find(|key| key.family != family) {
            return Err(KeyError::AlgorithmMismatch {
                algorithm,
                key: key.family,
            });
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims = ["exp", "sub"].into_iter().map(String::from).collect();
        Ok(Self {
            algorithm,
            keys,
            validation,
            groups_claim: DEFAULT_GROUPS_CLAIM.to_string(),
        })
    }

    /// Allowed clock skew in seconds for `exp` and `nbf`.
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self.validation.required_spec_claims.insert("iss".to_string());
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self.validation.required_spec_claims.insert("aud".to_string());
        self
    }

    /// Claim holding inline group membership (`groups` by default).
    pub fn with_groups_claim(mut self, claim: impl Into<String>) -> Self {
        self.groups_claim = claim.into();
        self
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Verify `raw` and return its claims.
    ///
    /// # Errors
    /// - `Malformed` for anything that is not a three-segment JWT with a
    ///   readable header, or a payload that is not a JSON object.
    /// - `UnsupportedAlgorithm` when the header declares any other algorithm.
    /// - `InvalidSignature` when no configured key validates the signature.
    /// - `Expired` when the signature is valid but `exp` has passed.
    /// - `MissingClaim` / `InvalidClaim` for absent or mismatched claims.
    pub fn verify(&self, raw: &str) -> Result<VerifiedClaims, TokenError> {
        let kid = self.inspect_header(raw)?;
        for key in self.ordered_keys(kid.as_deref()) {
            match jsonwebtoken::decode::<Value>(raw, &key.decoding_key, &self.validation) {
                Ok(data) => return self.claims_from_value(data.claims),
                Err(err) => match classify(err.kind()) {
                    // Another key may still match during rotation.
                    TokenError::InvalidSignature => continue,
                    other => return Err(other),
                },
            }
        }
        Err(TokenError::InvalidSignature)
    }

    fn inspect_header(&self, raw: &str) -> Result<Option<String>, TokenError> {
        let mut segments = raw.split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };
        if header.is_empty() || payload.is_empty() {
            return Err(TokenError::Malformed("empty segment".to_string()));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| TokenError::Malformed("header encoding".to_string()))?;
        let header: Value = serde_json::from_slice(&bytes)
            .map_err(|_| TokenError::Malformed("header json".to_string()))?;
        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| TokenError::Malformed("header alg".to_string()))?;
        match Algorithm::from_str(alg) {
            Ok(declared) if declared == self.algorithm => {}
            _ => return Err(TokenError::UnsupportedAlgorithm(alg.to_string())),
        }
        Ok(header
            .get("kid")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn ordered_keys(&self, kid: Option<&str>) -> Vec<&VerificationKey> {
        // Keys whose kid matches the header go first; the rest follow so a
        // token signed before a kid was assigned still verifies.
        let mut ordered = Vec::with_capacity(self.keys.len());
        match kid {
            Some(kid) => {
                ordered.extend(self.keys.iter().filter(|key| key.kid() == Some(kid)));
                ordered.extend(self.keys.iter().filter(|key| key.kid() != Some(kid)));
            }
            None => ordered.extend(self.keys.iter()),
        }
        ordered
    }

    fn claims_from_value(&self, claims: Value) -> Result<VerifiedClaims, TokenError> {
        if !claims.is_object() {
            return Err(TokenError::Malformed("payload is not an object".to_string()));
        }
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TokenError::MissingClaim("sub".to_string()))?;
        let expires_at = claims
            .get("exp")
            .and_then(numeric_date)
            .ok_or_else(|| TokenError::MissingClaim("exp".to_string()))?;
        Ok(VerifiedClaims {
            subject_id: SubjectId::new(subject),
            issued_at: claims.get("iat").and_then(numeric_date),
            expires_at,
            groups: extract_groups(&claims, &self.groups_claim),
        })
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim(claim.clone()),
        ErrorKind::InvalidIssuer => TokenError::InvalidClaim("iss".to_string()),
        ErrorKind::InvalidAudience => TokenError::InvalidClaim("aud".to_string()),
        ErrorKind::InvalidSubject => TokenError::InvalidClaim("sub".to_string()),
        ErrorKind::ImmatureSignature => TokenError::InvalidClaim("nbf".to_string()),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenError::UnsupportedAlgorithm("header".to_string())
        }
        ErrorKind::InvalidToken | ErrorKind::Json(_) => {
            TokenError::Malformed("payload".to_string())
        }
        _ => TokenError::InvalidSignature,
    }
}

fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|seconds| seconds as i64))
}

fn extract_groups(claims: &Value, name: &str) -> Option<Vec<String>> {
    // Issuers encode groups as an array of strings or a single string.
    let value = claims.get(name)?;
    if let Some(values) = value.as_array() {
        return Some(
            values
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        );
    }
    value.as_str().map(|value| vec![value.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey as Ed25519SigningKey;
    use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
    use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey};
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"gatekeeper-test-secret";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs() as i64
    }

    fn hs256_verifier() -> TokenVerifier {
        TokenVerifier::new(Algorithm::HS256, vec![VerificationKey::from_secret(SECRET)])
            .expect("verifier")
    }

    fn mint(alg: Algorithm, secret: &[u8], claims: &Value) -> String {
        jsonwebtoken::encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret))
            .expect("encode")
    }

    fn member_claims() -> Value {
        json!({
            "sub": "alice",
            "iat": now(),
            "exp": now() + 600,
            "groups": ["managers"]
        })
    }

    fn b64(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    #[test]
    fn verifies_valid_token_and_extracts_claims() {
        let token = mint(Algorithm::HS256, SECRET, &member_claims());
        let claims = hs256_verifier().verify(&token).expect("verify");
        assert_eq!(claims.subject_id.as_str(), "alice");
        assert_eq!(claims.groups, Some(vec!["managers".to_string()]));
        assert!(claims.issued_at.is_some());
    }

    #[test]
    fn rejects_tampered_payload() {
        let token = mint(Algorithm::HS256, SECRET, &member_claims());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = b64(&json!({
            "sub": "alice",
            "exp": now() + 600,
            "groups": ["admin"]
        }));
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
        let err = hs256_verifier().verify(&tampered).unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = mint(Algorithm::HS256, b"someone-else", &member_claims());
        let err = hs256_verifier().verify(&token).unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[test]
    fn rejects_alg_none() {
        let header = b64(&json!({ "alg": "none", "typ": "JWT" }));
        let payload = b64(&json!({ "sub": "alice", "exp": now() + 600, "groups": ["admin"] }));
        let token = format!("{header}.{payload}.");
        let err = hs256_verifier().verify(&token).unwrap_err();
        assert_eq!(err, TokenError::UnsupportedAlgorithm("none".to_string()));
    }

    #[test]
    fn rejects_other_algorithm_of_same_family() {
        let token = mint(Algorithm::HS512, SECRET, &member_claims());
        let err = hs256_verifier().verify(&token).unwrap_err();
        assert_eq!(err, TokenError::UnsupportedAlgorithm("HS512".to_string()));
    }

    #[test]
    fn rejects_malformed_structure() {
        let verifier = hs256_verifier();
        for raw in ["", "abc", "a.b", "a.b.c.d", ".payload.sig", "header..sig"] {
            let err = verifier.verify(raw).unwrap_err();
            assert!(matches!(err, TokenError::Malformed(_)), "{raw}: {err:?}");
        }
        let err = verifier.verify("!!!.payload.sig").unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[test]
    fn expired_is_distinct_from_signature_failure() {
        let claims = json!({ "sub": "alice", "exp": now() - 3600 });
        let token = mint(Algorithm::HS256, SECRET, &claims);
        let err = hs256_verifier().verify(&token).unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn not_yet_valid_token_is_rejected() {
        let claims = json!({
            "sub": "alice",
            "nbf": now() + 86_400,
            "exp": now() + 90_000,
            "groups": ["managers"]
        });
        let token = mint(Algorithm::HS256, SECRET, &claims);
        let err = hs256_verifier().verify(&token).unwrap_err();
        assert_eq!(err, TokenError::InvalidClaim("nbf".to_string()));

        let skewed = json!({ "sub": "alice", "nbf": now() + 5, "exp": now() + 600 });
        let token = mint(Algorithm::HS256, SECRET, &skewed);
        assert!(hs256_verifier().with_leeway(60).verify(&token).is_ok());
    }

    #[test]
    fn leeway_accepts_recently_expired_token() {
        let claims = json!({ "sub": "alice", "exp": now() - 5 });
        let token = mint(Algorithm::HS256, SECRET, &claims);
        let verifier = hs256_verifier().with_leeway(60);
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn missing_subject_and_expiry_are_rejected() {
        let verifier = hs256_verifier();
        let no_exp = mint(Algorithm::HS256, SECRET, &json!({ "sub": "alice" }));
        assert_eq!(
            verifier.verify(&no_exp).unwrap_err(),
            TokenError::MissingClaim("exp".to_string())
        );
        let no_sub = mint(Algorithm::HS256, SECRET, &json!({ "exp": now() + 60 }));
        assert_eq!(
            verifier.verify(&no_sub).unwrap_err(),
            TokenError::MissingClaim("sub".to_string())
        );
        let empty_sub = mint(
            Algorithm::HS256,
            SECRET,
            &json!({ "sub": "", "exp": now() + 60 }),
        );
        assert_eq!(
            verifier.verify(&empty_sub).unwrap_err(),
            TokenError::MissingClaim("sub".to_string())
        );
    }

    #[test]
    fn groups_claim_accepts_string_or_array() {
        let verifier = hs256_verifier();
        let single = mint(
            Algorithm::HS256,
            SECRET,
            &json!({ "sub": "bob", "exp": now() + 60, "groups": "dev" }),
        );
        assert_eq!(
            verifier.verify(&single).expect("verify").groups,
            Some(vec!["dev".to_string()])
        );
        let none = mint(
            Algorithm::HS256,
            SECRET,
            &json!({ "sub": "bob", "exp": now() + 60 }),
        );
        assert_eq!(verifier.verify(&none).expect("verify").groups, None);
    }

    #[test]
    fn custom_groups_claim_name() {
        let verifier = hs256_verifier().with_groups_claim("roles");
        let token = mint(
            Algorithm::HS256,
            SECRET,
            &json!({ "sub": "bob", "exp": now() + 60, "roles": ["ops", 7] }),
        );
        assert_eq!(
            verifier.verify(&token).expect("verify").groups,
            Some(vec!["ops".to_string()])
        );
    }

    #[test]
    fn issuer_and_audience_are_enforced_when_configured() {
        let verifier = hs256_verifier()
            .with_issuer("https://idp.example")
            .with_audience("gatekeeper");
        let good = mint(
            Algorithm::HS256,
            SECRET,
            &json!({
                "sub": "bob",
                "exp": now() + 60,
                "iss": "https://idp.example",
                "aud": "gatekeeper"
            }),
        );
        assert!(verifier.verify(&good).is_ok());
        let wrong_iss = mint(
            Algorithm::HS256,
            SECRET,
            &json!({
                "sub": "bob",
                "exp": now() + 60,
                "iss": "https://other.example",
                "aud": "gatekeeper"
            }),
        );
        assert_eq!(
            verifier.verify(&wrong_iss).unwrap_err(),
            TokenError::InvalidClaim("iss".to_string())
        );
    }

    #[test]
    fn rotated_keys_are_tried_by_kid_then_in_order() {
        let old = VerificationKey::from_secret(b"old-secret").with_kid("k0");
        let current = VerificationKey::from_secret(SECRET).with_kid("k1");
        let verifier = TokenVerifier::new(Algorithm::HS256, vec![current, old]).expect("verifier");

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k0".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &member_claims(),
            &EncodingKey::from_secret(b"old-secret"),
        )
        .expect("encode");
        assert!(verifier.verify(&token).is_ok());

        // No kid: every key is tried.
        let token = mint(Algorithm::HS256, b"old-secret", &member_claims());
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn eddsa_tokens_verify_with_pem_public_key() {
        let signing_key = Ed25519SigningKey::from_bytes(&[7u8; 32]);
        let der = signing_key.to_pkcs8_der().expect("pkcs8 der");
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &member_claims(),
            &EncodingKey::from_ed_der(der.as_bytes()),
        )
        .expect("encode");
        let pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("public pem");
        let key = VerificationKey::from_pem(Algorithm::EdDSA, pem.as_bytes()).expect("key");
        let verifier = TokenVerifier::new(Algorithm::EdDSA, vec![key]).expect("verifier");
        assert_eq!(
            verifier.verify(&token).expect("verify").subject_id.as_str(),
            "alice"
        );

        // An HS256 token signed with the public key bytes must not be accepted
        // by an EdDSA verifier.
        let confused = mint(
            Algorithm::HS256,
            &signing_key.verifying_key().to_bytes(),
            &member_claims(),
        );
        assert_eq!(
            verifier.verify(&confused).unwrap_err(),
            TokenError::UnsupportedAlgorithm("HS256".to_string())
        );
    }

    #[test]
    fn construction_rejects_mismatched_or_missing_keys() {
        let err = TokenVerifier::new(Algorithm::RS256, vec![VerificationKey::from_secret(SECRET)])
            .unwrap_err();
        assert!(matches!(
            err,
            KeyError::AlgorithmMismatch {
                key: KeyFamily::Hmac,
                ..
            }
        ));
        assert!(matches!(
            TokenVerifier::new(Algorithm::HS256, vec![]).unwrap_err(),
            KeyError::NoKeys
        ));
        assert!(matches!(
            VerificationKey::from_pem(Algorithm::HS256, b"pem").unwrap_err(),
            KeyError::InvalidMaterial(_)
        ));
        assert!(matches!(
            VerificationKey::from_pem(Algorithm::RS256, b"not a pem").unwrap_err(),
            KeyError::Jwt(_)
        ));
    }

    #[test]
    fn debug_output_omits_key_material() {
        let rendered = format!("{:?}", hs256_verifier());
        assert!(rendered.contains("HS256"));
        assert!(!rendered.contains("gatekeeper-test-secret"));
    }
}
