//! OIDC provider discovery: fetch and validate the issuer's
//! `/.well-known/openid-configuration` document.

use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http_client::{BoxError, HttpClient};
use crate::types::ProviderConfiguration;

/// Errors from provider discovery.
#[derive(Debug, Error, Diagnostic)]
pub enum DiscoveryError {
    /// Network-level failure
    #[error("transport error during discovery")]
    #[diagnostic(code(solid_oidc::discovery::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::discovery::http_build))]
    HttpBuild(#[from] http::Error),
    /// Non-success HTTP status
    #[error("discovery returned http status: {0}")]
    #[diagnostic(
        code(solid_oidc::discovery::http_status),
        help("the issuer may not serve openid-configuration at the well-known path")
    )]
    BadStatus(StatusCode),
    /// Body is not a JSON object
    #[error("malformed discovery document")]
    #[diagnostic(code(solid_oidc::discovery::malformed))]
    MalformedDocument(#[source] serde_json::Error),
    /// A field the flow depends on is absent
    #[error("discovery document is missing required field `{0}`")]
    #[diagnostic(code(solid_oidc::discovery::missing_field))]
    MissingRequiredField(&'static str),
    /// A field that must be a URL does not parse as one
    #[error("discovery field `{field}` is not a valid URL")]
    #[diagnostic(code(solid_oidc::discovery::invalid_url))]
    InvalidUrlField {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

pub type Result<T> = core::result::Result<T, DiscoveryError>;

/// Raw document as served; validation decides what is actually required.
#[derive(Deserialize, Debug, Default)]
struct RawProviderMetadata {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    jwks_uri: Option<String>,
    registration_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    response_types_supported: Option<Vec<String>>,
    subject_types_supported: Option<Vec<String>>,
    id_token_signing_alg_values_supported: Option<Vec<String>>,
    scopes_supported: Option<Vec<String>>,
    grant_types_supported: Option<Vec<String>>,
    token_endpoint_auth_methods_supported: Option<Vec<String>>,
    claims_supported: Option<Vec<String>>,
    dpop_signing_alg_values_supported: Option<Vec<String>>,
}

/// The well-known configuration URL for an issuer.
pub fn well_known_url(issuer: &Url) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.as_str().trim_end_matches('/')
    )
}

#[tracing::instrument(level = "debug", skip_all, fields(issuer = %issuer))]
pub async fn fetch_provider_configuration<T: HttpClient>(
    client: &T,
    issuer: &Url,
) -> Result<ProviderConfiguration> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(well_known_url(issuer))
        .header("Accept", "application/json")
        .body(Vec::new())?;
    let response = client
        .send_http(request)
        .await
        .map_err(|e| DiscoveryError::Transport(Box::new(e)))?;
    if !response.status().is_success() {
        return Err(DiscoveryError::BadStatus(response.status()));
    }
    let raw: RawProviderMetadata =
        serde_json::from_slice(response.body()).map_err(DiscoveryError::MalformedDocument)?;
    validate(raw)
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(DiscoveryError::MissingRequiredField(field))
}

fn require_url(value: Option<String>, field: &'static str) -> Result<Url> {
    let value = require(value, field)?;
    Url::parse(&value).map_err(|source| DiscoveryError::InvalidUrlField { field, source })
}

fn optional_url(value: Option<String>, field: &'static str) -> Result<Option<Url>> {
    value
        .map(|v| Url::parse(&v).map_err(|source| DiscoveryError::InvalidUrlField { field, source }))
        .transpose()
}

fn validate(raw: RawProviderMetadata) -> Result<ProviderConfiguration> {
    Ok(ProviderConfiguration {
        issuer: require_url(raw.issuer, "issuer")?,
        authorization_endpoint: require(raw.authorization_endpoint, "authorization_endpoint")?,
        token_endpoint: require_url(raw.token_endpoint, "token_endpoint")?,
        jwks_uri: require_url(raw.jwks_uri, "jwks_uri")?,
        registration_endpoint: optional_url(raw.registration_endpoint, "registration_endpoint")?,
        userinfo_endpoint: optional_url(raw.userinfo_endpoint, "userinfo_endpoint")?,
        end_session_endpoint: optional_url(raw.end_session_endpoint, "end_session_endpoint")?,
        response_types_supported: require(
            raw.response_types_supported,
            "response_types_supported",
        )?,
        subject_types_supported: require(raw.subject_types_supported, "subject_types_supported")?,
        id_token_signing_alg_values_supported: require(
            raw.id_token_signing_alg_values_supported,
            "id_token_signing_alg_values_supported",
        )?,
        scopes_supported: raw.scopes_supported,
        grant_types_supported: raw.grant_types_supported,
        token_endpoint_auth_methods_supported: raw.token_endpoint_auth_methods_supported,
        claims_supported: raw.claims_supported,
        dpop_signing_alg_values_supported: raw.dpop_signing_alg_values_supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClient;

    fn issuer() -> Url {
        Url::parse("https://issuer.example").unwrap()
    }

    fn full_document() -> serde_json::Value {
        serde_json::json!({
            "issuer": "https://issuer.example",
            "authorization_endpoint": "https://issuer.example/authorize",
            "token_endpoint": "https://issuer.example/token",
            "jwks_uri": "https://issuer.example/jwks",
            "registration_endpoint": "https://issuer.example/register",
            "end_session_endpoint": "https://issuer.example/logout",
            "response_types_supported": ["code", "code token"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256", "ES256"],
            "scopes_supported": ["openid", "webid", "offline_access"]
        })
    }

    #[tokio::test]
    async fn fetches_and_validates_configuration() {
        let client = MockClient::with_json(200, full_document());
        let config = fetch_provider_configuration(&client, &issuer()).await.unwrap();
        assert_eq!(config.issuer.as_str(), "https://issuer.example/");
        assert_eq!(config.jwks_uri.as_str(), "https://issuer.example/jwks");
        assert_eq!(
            config.registration_endpoint.unwrap().as_str(),
            "https://issuer.example/register"
        );
        let (parts, _) = client.last_request();
        assert_eq!(
            parts.uri.to_string(),
            "https://issuer.example/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn trailing_slash_issuer_does_not_double_slash() {
        let client = MockClient::with_json(200, full_document());
        let issuer = Url::parse("https://issuer.example/realm/").unwrap();
        fetch_provider_configuration(&client, &issuer).await.unwrap();
        let (parts, _) = client.last_request();
        assert_eq!(
            parts.uri.to_string(),
            "https://issuer.example/realm/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn missing_jwks_uri_is_reported_by_name() {
        let mut doc = full_document();
        doc.as_object_mut().unwrap().remove("jwks_uri");
        let client = MockClient::with_json(200, doc);
        let err = fetch_provider_configuration(&client, &issuer())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::MissingRequiredField("jwks_uri")
        ));
    }

    #[tokio::test]
    async fn invalid_token_endpoint_url_is_reported_by_name() {
        let mut doc = full_document();
        doc["token_endpoint"] = serde_json::json!("not a url");
        let client = MockClient::with_json(200, doc);
        let err = fetch_provider_configuration(&client, &issuer())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::InvalidUrlField {
                field: "token_endpoint",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let client = MockClient::with_json(404, serde_json::json!({}));
        let err = fetch_provider_configuration(&client, &issuer())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::BadStatus(status) if status.as_u16() == 404));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let client = MockClient::default();
        client.push_response(200, b"<html>login</html>".to_vec());
        let err = fetch_provider_configuration(&client, &issuer())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MalformedDocument(_)));
    }
}
