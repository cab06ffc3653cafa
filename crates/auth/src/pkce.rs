//! PKCE (Proof Key for Code Exchange) and random state generation utilities.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore as _, rngs::OsRng};
use sha2::{Digest, Sha256};
use tomclient_types::{Result, TomError};

fn random_base64url<const N: usize>() -> Result<String> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| TomError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a `code_verifier`: 32 random bytes as unpadded base64url (43 chars).
///
/// # Errors
///
/// Returns [`TomError::Entropy`] if the OS random source fails.
pub fn generate_verifier() -> Result<String> {
    random_base64url::<32>()
}

/// `BASE64URL(SHA256(verifier))`, the `S256` code challenge.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generate a PKCE `(code_verifier, code_challenge_s256)` pair.
///
/// # Errors
///
/// Returns [`TomError::Entropy`] if the OS random source fails.
pub fn generate_pkce() -> Result<(String, String)> {
    let verifier = generate_verifier()?;
    let challenge = derive_challenge(&verifier);
    Ok((verifier, challenge))
}

/// Generate a CSRF `state` value: 16 random bytes as unpadded base64url.
///
/// # Errors
///
/// Returns [`TomError::Entropy`] if the OS random source fails.
pub fn generate_state() -> Result<String> {
    random_base64url::<16>()
}
