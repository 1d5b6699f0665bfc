use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use miette::Diagnostic;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// State and nonce values are built from this many bytes of OS entropy.
pub const STATE_NONCE_BYTES: usize = 32;
/// PKCE code verifiers are built from this many bytes of OS entropy.
pub const CODE_VERIFIER_BYTES: usize = 32;

/// Errors from encoding and entropy helpers.
#[derive(Debug, Error, Diagnostic)]
pub enum EncodingError {
    /// Input is not valid unpadded base64url
    #[error("invalid base64url encoding")]
    #[diagnostic(
        code(solid_oidc::utils::invalid_encoding),
        help("expected the URL-safe alphabet without padding")
    )]
    InvalidEncoding(#[source] base64::DecodeError),
    /// The OS entropy source failed
    #[error("entropy source unavailable")]
    #[diagnostic(
        code(solid_oidc::utils::entropy),
        help("the OS random number generator could not produce bytes")
    )]
    EntropyUnavailable(#[source] rand::Error),
}

pub type Result<T> = core::result::Result<T, EncodingError>;

pub fn base64url_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(EncodingError::InvalidEncoding)
}

pub fn sha256(bytes: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Base64url string of `byte_len` bytes of OS entropy. Entropy exhaustion is
/// an error, never a weaker value.
pub fn random_url_safe_string(byte_len: usize) -> Result<String> {
    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(EncodingError::EntropyUnavailable)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

pub fn generate_state() -> Result<String> {
    random_url_safe_string(STATE_NONCE_BYTES)
}

pub fn generate_nonce() -> Result<String> {
    random_url_safe_string(STATE_NONCE_BYTES)
}

pub fn generate_code_verifier() -> Result<String> {
    random_url_safe_string(CODE_VERIFIER_BYTES)
}

// https://datatracker.ietf.org/doc/html/rfc7636#section-4.2
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
