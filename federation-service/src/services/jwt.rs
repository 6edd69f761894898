//! Verification of inbound bearer tokens issued by the identity provider.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use super::key_set::KeySetCache;
use super::FederationError;
use crate::models::is_valid_email;

/// Asymmetric algorithms the provider may sign with. Shared-secret HMAC
/// algorithms are never accepted for tokens verified against a public key set.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidToken {
    #[error("verification keys unavailable")]
    KeysUnavailable,

    #[error("malformed token")]
    Malformed,

    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("no verification key matches the token")]
    UnknownKey,

    #[error("invalid signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token has no valid email claim")]
    MissingEmail,
}

impl From<InvalidToken> for FederationError {
    fn from(err: InvalidToken) -> Self {
        FederationError::Unauthorized(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    exp: i64,
}

/// Claims of a token that passed verification. `email` is always non-empty
/// and syntactically valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub subject: Option<String>,
    pub email: String,
    pub name: Option<String>,
    pub issuer: Option<String>,
    pub expires_at: i64,
}

pub struct JwtVerifier {
    keys: Arc<KeySetCache>,
}

impl JwtVerifier {
    pub fn new(keys: Arc<KeySetCache>) -> Self {
        Self { keys }
    }

    /// Verify signature and expiry, then require an email claim.
    ///
    /// Issuer and audience are not bound: several client identities share
    /// one issuer and all of their tokens are accepted.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, InvalidToken> {
        let header = decode_header(token).map_err(|_| InvalidToken::Malformed)?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(InvalidToken::UnsupportedAlgorithm(header.alg));
        }

        let keys = self
            .keys
            .get_verification_keys()
            .await
            .map_err(|_| InvalidToken::KeysUnavailable)?;

        let claims = match header.kid.as_deref() {
            Some(kid) => {
                let key = match keys.find(kid) {
                    Some(jwk) => jwk.clone(),
                    None => {
                        // Possibly rotated since the last fetch.
                        let refreshed = self
                            .keys
                            .force_refresh()
                            .await
                            .map_err(|_| InvalidToken::KeysUnavailable)?;
                        refreshed.find(kid).cloned().ok_or(InvalidToken::UnknownKey)?
                    }
                };
                decode_with(token, header.alg, &key)?
            }
            None => decode_with_any(token, header.alg, &keys)?,
        };

        let email = claims
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| is_valid_email(e))
            .ok_or(InvalidToken::MissingEmail)?;

        Ok(VerifiedClaims {
            subject: claims.sub,
            email,
            name: claims.name.filter(|n| !n.trim().is_empty()),
            issuer: claims.iss,
            expires_at: claims.exp,
        })
    }
}

fn validation_for(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);
    validation
}

fn decode_with(token: &str, alg: Algorithm, jwk: &Jwk) -> Result<ProviderClaims, InvalidToken> {
    let key = DecodingKey::from_jwk(jwk).map_err(|_| InvalidToken::UnknownKey)?;
    decode::<ProviderClaims>(token, &key, &validation_for(alg))
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => InvalidToken::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => InvalidToken::BadSignature,
            _ => InvalidToken::Malformed,
        })
}

/// Tokens without a `kid` are tried against every key in the set.
fn decode_with_any(
    token: &str,
    alg: Algorithm,
    keys: &JwkSet,
) -> Result<ProviderClaims, InvalidToken> {
    let mut last_error = InvalidToken::UnknownKey;
    for jwk in &keys.keys {
        match decode_with(token, alg, jwk) {
            Ok(claims) => return Ok(claims),
            // Signature checked out; only the claims are bad.
            Err(e @ (InvalidToken::Expired | InvalidToken::Malformed)) => return Err(e),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}
