//! Startup loading of token verification keys.
//!
//! Keys are loaded once, before the listener binds, and frozen into a
//! [`TokenVerifier`]. Any failure here aborts startup; there is no per-request
//! refetch and rotation requires a restart.
use crate::config::{KeySource, TokenConfig, parse_algorithm};
use crate::store::{KeyStore, StoredKey};
use anyhow::{Context, Result, bail};
use gatekeeper_authz::{Algorithm, KeyFamily, TokenVerifier, VerificationKey};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, PublicKeyUse};
use std::time::Duration;

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn load_verifier(
    config: &TokenConfig,
    key_store: Option<&dyn KeyStore>,
) -> Result<TokenVerifier> {
    let keys = match config.key_source {
        KeySource::Secret => {
            let secret = config
                .secret
                .as_deref()
                .filter(|secret| !secret.is_empty())
                .context("token secret not configured")?;
            vec![VerificationKey::from_secret(secret.as_bytes())]
        }
        KeySource::PemFile => {
            let path = config
                .pem_path
                .as_ref()
                .context("token pem_path not configured")?;
            let pem = std::fs::read(path)
                .with_context(|| format!("read verification key {}", path.display()))?;
            vec![
                VerificationKey::from_pem(config.algorithm, &pem)
                    .with_context(|| format!("parse verification key {}", path.display()))?,
            ]
        }
        KeySource::JwksUrl => {
            let url = config
                .jwks_url
                .as_deref()
                .context("token jwks_url not configured")?;
            fetch_jwks(url, config.algorithm).await?
        }
        KeySource::Store => {
            let store = key_store.context("key_source store requires an identity store")?;
            let stored = store
                .verification_key(&config.store_key_id)
                .await
                .context("read verification key from store")?
                .with_context(|| format!("verification key {} not found", config.store_key_id))?;
            vec![stored_key_to_verification_key(&stored, config.algorithm)?]
        }
    };

    let mut verifier = TokenVerifier::new(config.algorithm, keys)
        .context("build token verifier")?
        .with_leeway(config.leeway_seconds)
        .with_groups_claim(config.groups_claim.clone());
    if let Some(issuer) = &config.issuer {
        verifier = verifier.with_issuer(issuer);
    }
    if let Some(audience) = &config.audience {
        verifier = verifier.with_audience(audience);
    }
    tracing::info!(
        algorithm = ?config.algorithm,
        source = config.key_source.as_str(),
        keys = verifier.key_count(),
        "verification keys loaded"
    );
    Ok(verifier)
}

fn stored_key_to_verification_key(
    stored: &StoredKey,
    algorithm: Algorithm,
) -> Result<VerificationKey> {
    let declared = parse_algorithm(&stored.algorithm)?;
    if declared != algorithm {
        bail!(
            "verification key {} is for {:?}, configured algorithm is {:?}",
            stored.key_id,
            declared,
            algorithm
        );
    }
    let key = match KeyFamily::of(algorithm) {
        KeyFamily::Hmac => VerificationKey::from_secret(stored.key_material.as_bytes()),
        _ => VerificationKey::from_pem(algorithm, stored.key_material.as_bytes())
            .with_context(|| format!("parse verification key {}", stored.key_id))?,
    };
    Ok(key.with_kid(stored.key_id.clone()))
}

async fn fetch_jwks(url: &str, algorithm: Algorithm) -> Result<Vec<VerificationKey>> {
    let client = reqwest::Client::builder()
        .timeout(JWKS_FETCH_TIMEOUT)
        .build()
        .context("build jwks client")?;
    let jwks: JwkSet = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetch jwks from {url}"))?
        .error_for_status()
        .context("jwks endpoint returned an error status")?
        .json()
        .await
        .context("decode jwks")?;

    let mut keys = Vec::new();
    for jwk in &jwks.keys {
        if !jwk_matches_algorithm(jwk, algorithm) {
            tracing::debug!(kid = ?jwk.common.key_id, "skipping jwk for another algorithm");
            continue;
        }
        keys.push(VerificationKey::from_jwk(jwk).context("parse jwk")?);
    }
    if keys.is_empty() {
        bail!("jwks at {url} has no signing keys for {algorithm:?}");
    }
    Ok(keys)
}

fn jwk_matches_algorithm(jwk: &Jwk, algorithm: Algorithm) -> bool {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return false;
    }
    // KeyAlgorithm and Algorithm share variant names for signing algorithms.
    if let Some(key_alg) = jwk.common.key_algorithm
        && format!("{key_alg:?}") != format!("{algorithm:?}")
    {
        return false;
    }
    let family = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
        AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
        AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Ed,
        AlgorithmParameters::OctetKey(_) => KeyFamily::Hmac,
    };
    family == KeyFamily::of(algorithm)
}
