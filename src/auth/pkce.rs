//! Proof-key (PKCE) and anti-forgery token generation for the
//! authorization-code flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A PKCE verifier/challenge pair (S256 method, RFC 7636).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The secret verifier, sent only in the token exchange.
    pub verifier: String,
    /// SHA-256 of the verifier, sent in the authorization URL.
    pub challenge: String,
}

/// Generates a fresh verifier/challenge pair from 32 random bytes.
#[must_use]
pub fn generate_pkce() -> PkceChallenge {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Generates a random anti-forgery state token for the authorization URL.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pkce = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn verifier_is_url_safe_without_padding() {
        let pkce = generate_pkce();
        // 32 bytes base64url-encode to 43 characters with no '=' padding.
        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.verifier.contains('='));
        assert!(!pkce.verifier.contains('+'));
        assert!(!pkce.verifier.contains('/'));
    }

    #[test]
    fn pairs_are_unique() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn state_tokens_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert!(!generate_state().is_empty());
    }
}
