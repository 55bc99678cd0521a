//! PKCE (RFC 7636) and CSRF-state generation.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::Rng,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

const VERIFIER_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LEN: usize = 64;

/// Generate a code verifier and its S256 challenge.
pub fn generate_pkce() -> PkceChallenge {
    let mut rng = rand::rng();
    let verifier: String = (0..VERIFIER_LEN)
        .map(|_| VERIFIER_CHARS[rng.random_range(0..VERIFIER_CHARS.len())] as char)
        .collect();

    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);

    PkceChallenge { verifier, challenge }
}

/// Random nonce for the `state` parameter.
pub fn generate_state() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 24] = rng.random();
    URL_SAFE_NO_PAD.encode(bytes)
}
