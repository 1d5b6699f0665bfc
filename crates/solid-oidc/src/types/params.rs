//! Serializable parameter bundles handed between the sign-in flow, callers,
//! and backends that refresh tokens on the client's behalf.
//!
//! Bundles round-trip through base64-encoded JSON so they can travel in
//! headers or opaque storage without escaping concerns.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::config::AuthenticationMethod;

/// Errors from bundle encode/decode.
#[derive(Debug, Error, Diagnostic)]
pub enum ParamsError {
    /// Not valid base64
    #[error("invalid base64 parameter bundle")]
    #[diagnostic(code(solid_oidc::params::base64))]
    InvalidEncoding(#[from] base64::DecodeError),
    /// Not the expected JSON shape
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::params::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, ParamsError>;

fn to_base64<T: Serialize>(value: &T) -> Result<String> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

fn from_base64<T: for<'de> Deserialize<'de>>(encoded: &str) -> Result<T> {
    Ok(serde_json::from_slice(&STANDARD.decode(encoded)?)?)
}

/// Everything needed to exchange an authorization code for tokens.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CodeParameters {
    pub token_endpoint: Url,
    pub code_verifier: String,
    pub code: String,
    pub redirect_uri: Url,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub authentication_method: AuthenticationMethod,
}

impl CodeParameters {
    pub fn to_base64(&self) -> Result<String> {
        to_base64(self)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        from_base64(encoded)
    }
}

/// Everything needed to refresh tokens later, possibly from another process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RefreshParameters {
    pub token_endpoint: Url,
    pub refresh_token: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub authentication_method: AuthenticationMethod,
}

impl RefreshParameters {
    pub fn to_base64(&self) -> Result<String> {
        to_base64(self)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        from_base64(encoded)
    }
}

/// Handoff bundle for a backend: how to refresh, where the keys live, and
/// who the user is.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerParameters {
    pub refresh: RefreshParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_iri: Option<Url>,
    pub jwks_url: Url,
    pub webid: String,
}

impl ServerParameters {
    pub fn to_base64(&self) -> Result<String> {
        to_base64(self)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        from_base64(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_parameters() -> CodeParameters {
        CodeParameters {
            token_endpoint: Url::parse("https://issuer.example/token").unwrap(),
            code_verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into(),
            code: "auth-code-1".into(),
            redirect_uri: Url::parse("com.example.app://callback").unwrap(),
            client_id: "client-1".into(),
            client_secret: Some("s3cret".into()),
            authentication_method: AuthenticationMethod::Basic,
        }
    }

    #[test]
    fn code_parameters_base64_round_trip() {
        let params = code_parameters();
        let encoded = params.to_base64().unwrap();
        assert_eq!(CodeParameters::from_base64(&encoded).unwrap(), params);
    }

    #[test]
    fn server_parameters_base64_round_trip() {
        let params = ServerParameters {
            refresh: RefreshParameters {
                token_endpoint: Url::parse("https://issuer.example/token").unwrap(),
                refresh_token: "refresh-1".into(),
                client_id: "client-1".into(),
                client_secret: None,
                authentication_method: AuthenticationMethod::None,
            },
            storage_iri: Some(Url::parse("https://alice.example/storage/").unwrap()),
            jwks_url: Url::parse("https://issuer.example/jwks").unwrap(),
            webid: "https://alice.example/profile#me".into(),
        };
        let encoded = params.to_base64().unwrap();
        assert_eq!(ServerParameters::from_base64(&encoded).unwrap(), params);
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(matches!(
            CodeParameters::from_base64("not base64!!").unwrap_err(),
            ParamsError::InvalidEncoding(_)
        ));
    }
}
