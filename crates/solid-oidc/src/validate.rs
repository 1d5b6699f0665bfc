//! Token validation: JWKS retrieval, signature verification, and time-based
//! claims checks. Signature and claims validation are deliberately separate
//! steps so callers can re-check claims without refetching keys.

use chrono::Utc;
use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::http_client::{BoxError, HttpClient};
use crate::jose::{self, Header, JoseError};
use crate::jwk::JwkSet;

/// Errors from key retrieval and token verification.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidateError {
    /// Network-level failure
    #[error("transport error fetching key set")]
    #[diagnostic(code(solid_oidc::validate::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::validate::http_build))]
    HttpBuild(#[from] http::Error),
    /// Non-success HTTP status from the JWKS endpoint
    #[error("jwks endpoint returned http status: {0}")]
    #[diagnostic(code(solid_oidc::validate::http_status))]
    BadStatus(StatusCode),
    /// Key set did not decode
    #[error("malformed key set")]
    #[diagnostic(code(solid_oidc::validate::body_decode))]
    BodyDecode(#[source] serde_json::Error),
    /// No key in the set matches the token's header
    #[error("no key in the set matches the token")]
    #[diagnostic(
        code(solid_oidc::validate::no_matching_key),
        help("the provider may have rotated keys; refetch the JWKS")
    )]
    NoMatchingKey,
    /// Signature verification failed; fatal for the token
    #[error("token signature invalid")]
    #[diagnostic(code(solid_oidc::validate::signature))]
    SignatureInvalid(#[source] JoseError),
    /// Token structure or claims did not decode
    #[error("malformed token")]
    #[diagnostic(code(solid_oidc::validate::malformed))]
    MalformedToken(#[source] JoseError),
}

pub type Result<T> = core::result::Result<T, ValidateError>;

/// `aud` claim, which providers serialize either way.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == value,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// DPoP key confirmation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
}

/// Claims carried by Solid-OIDC ID and access tokens. Everything is optional
/// at the decoding layer; policy lives in [`validate_claims`] and callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webid: Option<String>,
}

impl TokenClaims {
    /// The user's identity: the `webid` claim when present, else `sub`.
    pub fn identity(&self) -> Option<&str> {
        self.webid.as_deref().or(self.sub.as_deref())
    }
}

/// Outcome of time-based claims validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsValidity {
    Valid,
    Expired,
    NotYetValid,
    IssuedInFuture,
}

/// Check `exp`, `nbf`, and `iat` against the current time with `leeway`
/// seconds of clock-skew tolerance. Absent claims pass their check.
pub fn validate_claims(claims: &TokenClaims, leeway: i64) -> ClaimsValidity {
    let now = Utc::now().timestamp();
    if let Some(exp) = claims.exp {
        if exp < now - leeway {
            return ClaimsValidity::Expired;
        }
    }
    if let Some(nbf) = claims.nbf {
        if nbf > now + leeway {
            return ClaimsValidity::NotYetValid;
        }
    }
    if let Some(iat) = claims.iat {
        if iat > now + leeway {
            return ClaimsValidity::IssuedInFuture;
        }
    }
    ClaimsValidity::Valid
}

/// A token whose signature has been verified against the provider's keys.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub raw: String,
    pub header: Header,
    pub claims: TokenClaims,
}

#[tracing::instrument(level = "debug", skip_all, fields(jwks_url = %jwks_url))]
pub async fn fetch_jwks<T: HttpClient>(client: &T, jwks_url: &Url) -> Result<JwkSet> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(jwks_url.as_str())
        .header("Accept", "application/json")
        .body(Vec::new())?;
    let response = client
        .send_http(request)
        .await
        .map_err(|e| ValidateError::Transport(Box::new(e)))?;
    if !response.status().is_success() {
        return Err(ValidateError::BadStatus(response.status()));
    }
    serde_json::from_slice(response.body()).map_err(ValidateError::BodyDecode)
}

/// Verify a compact JWT against the key set and decode its claims.
///
/// Key selection is by `kid` when the header names one, otherwise the first
/// key matching the header's algorithm. Signature failure is fatal; there is
/// no unverified fallback here.
pub fn decode(token: &str, keys: &JwkSet) -> Result<VerifiedToken> {
    let header = jose::decode_header(token).map_err(ValidateError::MalformedToken)?;
    let key = match &header.kid {
        Some(kid) => keys.find(kid),
        None => keys.keys.iter().find(|key| {
            key.alg()
                .map(|alg| alg == header.alg.as_str())
                .unwrap_or_else(|| key.implied_alg() == header.alg)
        }),
    }
    .ok_or(ValidateError::NoMatchingKey)?;
    jose::verify_compact(token, key).map_err(ValidateError::SignatureInvalid)?;
    let claims = jose::decode_unverified_claims(token).map_err(ValidateError::MalformedToken)?;
    Ok(VerifiedToken {
        raw: token.to_owned(),
        header,
        claims,
    })
}

/// Decode claims without signature verification. Used for reading the webid
/// out of a token before the key set is available; never a substitute for
/// [`decode`].
pub fn decode_unverified(token: &str) -> Result<TokenClaims> {
    jose::decode_unverified_claims(token).map_err(ValidateError::MalformedToken)
}
