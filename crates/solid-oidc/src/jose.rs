//! Compact JWS signing and verification for the token types this client
//! produces (DPoP proofs) and consumes (ID tokens, access tokens).

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use thiserror::Error;

use crate::jwk::{ClientKey, Jwk, KeyError};
use crate::utils::{EncodingError, base64url_decode, base64url_encode};

/// Signature algorithms this crate signs and verifies with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    Es256,
}

impl JwsAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::Rs256 => "RS256",
            JwsAlgorithm::Es256 => "ES256",
        }
    }
}

impl std::fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protected JWS header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub alg: JwsAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl From<JwsAlgorithm> for Header {
    fn from(alg: JwsAlgorithm) -> Self {
        Self {
            alg,
            typ: None,
            kid: None,
            jwk: None,
        }
    }
}

/// Errors from JWS encode/decode/verify.
#[derive(Debug, Error, Diagnostic)]
pub enum JoseError {
    /// Token is not three base64url segments
    #[error("malformed compact JWS")]
    #[diagnostic(
        code(solid_oidc::jose::malformed),
        help("expected header.payload.signature segments")
    )]
    Malformed,
    /// Signature does not verify against the given key
    #[error("signature verification failed")]
    #[diagnostic(code(solid_oidc::jose::signature))]
    SignatureInvalid,
    /// Header algorithm does not match the key type
    #[error("algorithm {alg} does not match the key")]
    #[diagnostic(
        code(solid_oidc::jose::key_mismatch),
        help("RS256 requires an RSA key, ES256 a P-256 key")
    )]
    KeyMismatch { alg: JwsAlgorithm },
    /// Signing failed
    #[error("signing error: {0}")]
    #[diagnostic(code(solid_oidc::jose::signing))]
    Signing(String),
    /// Serialization error
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::jose::serde))]
    Serde(#[from] serde_json::Error),
    /// Encoding error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Encoding(#[from] EncodingError),
    /// Key error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),
}

pub type Result<T> = core::result::Result<T, JoseError>;

/// Build a compact JWS from the header and claims, signed with `key`.
pub fn sign_compact<C: Serialize>(key: &ClientKey, header: &Header, claims: &C) -> Result<String> {
    if header.alg != key.alg() {
        return Err(JoseError::KeyMismatch { alg: header.alg });
    }
    let header = base64url_encode(serde_json::to_string(header)?);
    let payload = base64url_encode(serde_json::to_string(claims)?);
    let message = format!("{header}.{payload}");
    let signature = match key {
        ClientKey::Rs256(private) => {
            let signing = rsa::pkcs1v15::SigningKey::<Sha256>::new(private.clone());
            let sig: rsa::pkcs1v15::Signature = signing
                .try_sign(message.as_bytes())
                .map_err(|e| JoseError::Signing(e.to_string()))?;
            base64url_encode(sig.to_bytes())
        }
        ClientKey::Es256(signing) => {
            let sig: p256::ecdsa::Signature = signing.sign(message.as_bytes());
            base64url_encode(sig.to_bytes())
        }
    };
    Ok(format!("{message}.{signature}"))
}

pub fn split_compact(token: &str) -> Result<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => Err(JoseError::Malformed),
    }
}

pub fn decode_header(token: &str) -> Result<Header> {
    let (header, _, _) = split_compact(token)?;
    Ok(serde_json::from_slice(&base64url_decode(header)?)?)
}

/// Verify the compact JWS signature against a public key. The header's `alg`
/// must match the key type; there is no fallback to unverified parsing.
pub fn verify_compact(token: &str, key: &Jwk) -> Result<()> {
    let (header_b64, payload_b64, signature_b64) = split_compact(token)?;
    let header: Header = serde_json::from_slice(&base64url_decode(header_b64)?)?;
    let message = format!("{header_b64}.{payload_b64}");
    let signature = base64url_decode(signature_b64)?;
    match (key, header.alg) {
        (Jwk::Rsa(rsa_jwk), JwsAlgorithm::Rs256) => {
            let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(rsa_jwk.public_key()?);
            let signature = rsa::pkcs1v15::Signature::try_from(signature.as_slice())
                .map_err(|_| JoseError::SignatureInvalid)?;
            verifying
                .verify(message.as_bytes(), &signature)
                .map_err(|_| JoseError::SignatureInvalid)
        }
        (Jwk::Ec(ec_jwk), JwsAlgorithm::Es256) => {
            let verifying = ec_jwk.verifying_key()?;
            let signature = p256::ecdsa::Signature::from_slice(&signature)
                .map_err(|_| JoseError::SignatureInvalid)?;
            verifying
                .verify(message.as_bytes(), &signature)
                .map_err(|_| JoseError::SignatureInvalid)
        }
        (_, alg) => Err(JoseError::KeyMismatch { alg }),
    }
}

/// Decode the claims segment without checking the signature. Only for values
/// that are re-checked elsewhere or used before the key set is available.
pub fn decode_unverified_claims<T: DeserializeOwned>(token: &str) -> Result<T> {
    let (_, payload, _) = split_compact(token)?;
    Ok(serde_json::from_slice(&base64url_decode(payload)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn claims() -> TestClaims {
        TestClaims {
            sub: "https://alice.example/profile#me".into(),
            exp: 2_000_000_000,
        }
    }

    #[test]
    fn es256_sign_and_verify() {
        let key = ClientKey::generate_es256();
        let token = sign_compact(&key, &Header::from(JwsAlgorithm::Es256), &claims()).unwrap();
        let jwk = key.public_jwk().unwrap();
        verify_compact(&token, &jwk).unwrap();
        let decoded: TestClaims = decode_unverified_claims(&token).unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = ClientKey::generate_es256();
        let token = sign_compact(&key, &Header::from(JwsAlgorithm::Es256), &claims()).unwrap();
        let (header, _, signature) = split_compact(&token).unwrap();
        let forged_payload = base64url_encode(r#"{"sub":"attacker","exp":2000000000}"#);
        let forged = format!("{header}.{forged_payload}.{signature}");
        assert!(matches!(
            verify_compact(&forged, &key.public_jwk().unwrap()).unwrap_err(),
            JoseError::SignatureInvalid
        ));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = ClientKey::generate_es256();
        let other = ClientKey::generate_es256();
        let token = sign_compact(&key, &Header::from(JwsAlgorithm::Es256), &claims()).unwrap();
        assert!(matches!(
            verify_compact(&token, &other.public_jwk().unwrap()).unwrap_err(),
            JoseError::SignatureInvalid
        ));
    }

    #[test]
    fn header_alg_must_match_key() {
        let key = ClientKey::generate_es256();
        let err = sign_compact(&key, &Header::from(JwsAlgorithm::Rs256), &claims()).unwrap_err();
        assert!(matches!(
            err,
            JoseError::KeyMismatch {
                alg: JwsAlgorithm::Rs256
            }
        ));
    }

    #[test]
    fn split_rejects_wrong_segment_count() {
        assert!(matches!(
            split_compact("onlyone").unwrap_err(),
            JoseError::Malformed
        ));
        assert!(matches!(
            split_compact("a.b.c.d").unwrap_err(),
            JoseError::Malformed
        ));
    }
}
