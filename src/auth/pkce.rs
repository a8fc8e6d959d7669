//! PKCE challenge/verifier generation and verification.
//!
//! SHA256 digest, URL-safe-no-pad base64 encoding, and a constant-time
//! comparison of the recomputed challenge against the one stored at
//! `/authorize` time.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const METHOD_S256: &str = "S256";
pub const METHOD_PLAIN: &str = "plain";

pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn challenge_from_verifier(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Verify `verifier` reproduces `challenge` under `method` ("S256" or
/// "plain"). Comparison is constant-time to avoid leaking challenge bytes
/// through timing.
pub fn verify(verifier: &str, challenge: &str, method: &str) -> bool {
    let recomputed = match method {
        METHOD_S256 => challenge_from_verifier(verifier),
        METHOD_PLAIN => verifier.to_string(),
        _ => return false,
    };
    recomputed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_round_trip_verifies() {
        let verifier = generate_verifier();
        let challenge = challenge_from_verifier(&verifier);
        assert!(verify(&verifier, &challenge, METHOD_S256));
    }

    #[test]
    fn wrong_verifier_fails() {
        let challenge = challenge_from_verifier(&generate_verifier());
        assert!(!verify("not-the-verifier", &challenge, METHOD_S256));
    }

    #[test]
    fn unknown_method_fails_closed() {
        let verifier = generate_verifier();
        let challenge = challenge_from_verifier(&verifier);
        assert!(!verify(&verifier, &challenge, "bogus"));
    }
}
