//! PKCE (RFC 7636) and state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a PKCE code verifier and its S256 challenge.
///
/// The verifier is 43 base64url characters (32 random bytes), inside the
/// RFC 7636 43-128 character window.
#[must_use]
pub fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// Generate a random state parameter (128 bits)
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_length_in_rfc_window() {
        let (verifier, _) = generate_pkce();
        assert!((43..=128).contains(&verifier.len()));
    }

    #[test]
    fn verifier_and_challenge_are_base64url_safe() {
        for _ in 0..10 {
            let (verifier, challenge) = generate_pkce();
            for value in [&verifier, &challenge] {
                assert!(!value.contains('+'));
                assert!(!value.contains('/'));
                assert!(!value.contains('='));
            }
        }
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        assert_eq!(challenge, URL_SAFE_NO_PAD.encode(hasher.finalize()));
    }

    #[test]
    fn values_are_unique() {
        let (v1, c1) = generate_pkce();
        let (v2, c2) = generate_pkce();
        assert_ne!(v1, v2);
        assert_ne!(c1, c2);
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn state_has_sufficient_length() {
        // 16 random bytes encode to 22 base64url chars
        assert!(generate_state().len() >= 20);
    }
}
