//! Token parsing and verification
//!
//! Verification resolves the signing key by `kid` from the discovery JWKS
//! snapshot, then enforces expiry with zero skew and the issuer/audience
//! checks unless the corresponding skip toggles are set.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, jwk::JwkSet};
use tracing::debug;

use super::claims::Claims;
use crate::{Error, Result};

/// Verification policy derived from configuration
#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    /// Expected issuer (the discovery document's issuer)
    pub issuer: String,
    /// Client id the audience must contain
    pub client_id: String,
    /// Skip the issuer check
    pub skip_issuer_check: bool,
    /// Skip the audience check
    pub skip_client_id_check: bool,
}

/// Stateless token codec
pub struct TokenCodec;

impl TokenCodec {
    /// Decode the claims of a compact JWS without verifying the signature.
    ///
    /// Used for expiry peeking and store-key hashing; never for
    /// authorization decisions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroLengthToken`] for an empty token and
    /// [`Error::TokenVerificationFailure`] for anything that is not a
    /// three-part JWS with a JSON payload.
    pub fn parse(raw: &str) -> Result<Claims> {
        if raw.is_empty() {
            return Err(Error::ZeroLengthToken);
        }
        let payload = raw
            .split('.')
            .nth(1)
            .ok_or(Error::TokenVerificationFailure)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| Error::TokenVerificationFailure)?;
        serde_json::from_slice(&bytes).map_err(|_| Error::TokenVerificationFailure)
    }

    /// Verify a compact JWS against the JWKS and the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenVerificationFailure`] when no key matches the
    /// token's `kid`, the signature is invalid, the token is expired, or the
    /// issuer/audience checks fail.
    pub fn verify(raw: &str, keys: &JwkSet, policy: &VerifyPolicy) -> Result<Claims> {
        if raw.is_empty() {
            return Err(Error::ZeroLengthToken);
        }

        let header =
            jsonwebtoken::decode_header(raw).map_err(|_| Error::TokenVerificationFailure)?;

        let jwk = match header.kid.as_deref() {
            Some(kid) => keys.find(kid),
            // No kid: a single-key set is unambiguous
            None if keys.keys.len() == 1 => keys.keys.first(),
            None => None,
        }
        .ok_or_else(|| {
            debug!(kid = ?header.kid, "no matching key in JWKS");
            Error::TokenVerificationFailure
        })?;

        let key = DecodingKey::from_jwk(jwk).map_err(|_| Error::TokenVerificationFailure)?;

        let mut validation = Validation::new(algorithm(&header)?);
        validation.leeway = 0;
        validation.validate_exp = true;
        if policy.skip_issuer_check {
            validation.iss = None;
        } else {
            validation.set_issuer(&[policy.issuer.as_str()]);
        }
        if policy.skip_client_id_check {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[policy.client_id.as_str()]);
        }

        let data = jsonwebtoken::decode::<Claims>(raw, &key, &validation).map_err(|err| {
            debug!(error = %err, "token verification failed");
            Error::TokenVerificationFailure
        })?;

        Ok(data.claims)
    }
}

fn algorithm(header: &jsonwebtoken::Header) -> Result<Algorithm> {
    match header.alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            // Symmetric algorithms cannot be verified against a public JWKS
            Err(Error::TokenVerificationFailure)
        }
        alg => Ok(alg),
    }
}
