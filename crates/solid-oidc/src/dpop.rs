//! DPoP proof JWTs (RFC 9449) binding requests to a client-held key.

use chrono::Utc;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::jose::{self, Header, JoseError};
use crate::jwk::{ClientKey, KeyError};
use crate::utils::{EncodingError, base64url_encode, random_url_safe_string, sha256};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";
/// Request header carrying the proof.
pub const DPOP_HEADER: &str = "DPoP";

/// Errors from proof construction.
#[derive(Debug, Error, Diagnostic)]
pub enum DpopError {
    /// The signing key could not produce a proof
    #[error("signing key invalid for DPoP proof")]
    #[diagnostic(
        code(solid_oidc::dpop::signing_key),
        help("check the key material matches its declared algorithm")
    )]
    SigningKeyInvalid(#[source] JoseError),
    /// Public key derivation failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),
    /// Entropy failure while generating `jti`
    #[error(transparent)]
    #[diagnostic(transparent)]
    Entropy(#[from] EncodingError),
}

pub type Result<T> = core::result::Result<T, DpopError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProofClaims {
    pub jti: String,
    pub iat: i64,
    pub htm: String,
    pub htu: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
}

#[inline]
fn generate_jti() -> core::result::Result<String, EncodingError> {
    random_url_safe_string(12)
}

/// Build a DPoP proof for one request. Every call produces a fresh `jti` and
/// a current `iat`; proofs are never reused across requests.
///
/// `access_token` adds the `ath` confirmation claim (hash of the token) for
/// resource requests; token endpoint requests pass `None`.
pub fn build_dpop_proof(
    key: &ClientKey,
    method: &http::Method,
    url: &Url,
    access_token: Option<&str>,
) -> Result<String> {
    let mut header = Header::from(key.alg());
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(key.public_jwk()?);

    // htu is the URL without query or fragment
    // https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
    let mut htu = url.clone();
    htu.set_query(None);
    htu.set_fragment(None);

    let claims = ProofClaims {
        jti: generate_jti()?,
        iat: Utc::now().timestamp(),
        htm: method.as_str().to_owned(),
        htu: htu.into(),
        ath: access_token.map(|token| base64url_encode(sha256(token))),
    };
    jose::sign_compact(key, &header, &claims).map_err(DpopError::SigningKeyInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jose::decode_unverified_claims;

    fn token_url() -> Url {
        Url::parse("https://issuer.example/token").unwrap()
    }

    #[test]
    fn proof_header_carries_typ_and_public_jwk() {
        let key = ClientKey::generate_es256();
        let proof = build_dpop_proof(&key, &http::Method::POST, &token_url(), None).unwrap();
        let header = jose::decode_header(&proof).unwrap();
        assert_eq!(header.typ.as_deref(), Some(JWT_HEADER_TYP_DPOP));
        assert_eq!(header.jwk, Some(key.public_jwk().unwrap()));
        // self-contained: the embedded key verifies the proof
        jose::verify_compact(&proof, &header.jwk.unwrap()).unwrap();
    }

    #[test]
    fn consecutive_proofs_are_fresh() {
        let key = ClientKey::generate_es256();
        let first = build_dpop_proof(&key, &http::Method::POST, &token_url(), None).unwrap();
        let second = build_dpop_proof(&key, &http::Method::POST, &token_url(), None).unwrap();
        let a: ProofClaims = decode_unverified_claims(&first).unwrap();
        let b: ProofClaims = decode_unverified_claims(&second).unwrap();
        assert_ne!(a.jti, b.jti);
        assert!(b.iat >= a.iat);
    }

    #[test]
    fn htu_strips_query_and_ath_hashes_token() {
        let key = ClientKey::generate_es256();
        let url = Url::parse("https://pod.example/resource?foo=bar#frag").unwrap();
        let proof = build_dpop_proof(&key, &http::Method::GET, &url, Some("tok-123")).unwrap();
        let claims: ProofClaims = decode_unverified_claims(&proof).unwrap();
        assert_eq!(claims.htu, "https://pod.example/resource");
        assert_eq!(claims.htm, "GET");
        assert_eq!(claims.ath.as_deref(), Some(&*base64url_encode(sha256("tok-123"))));
    }
}
