//! OIDC dynamic client registration (RFC 7591) against the provider's
//! registration endpoint.

use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::http_client::{BoxError, HttpClient};
use crate::types::SignInConfiguration;
use crate::types::response::OAuthErrorResponse;

/// Errors from dynamic registration.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistrationError {
    /// Network-level failure
    #[error("transport error during registration")]
    #[diagnostic(code(solid_oidc::registration::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::registration::http_build))]
    HttpBuild(#[from] http::Error),
    /// The provider rejected the registration with an OAuth error body
    #[error("registration rejected: {}", error.error)]
    #[diagnostic(
        code(solid_oidc::registration::rejected),
        help("inspect `error_description` for the provider's reason")
    )]
    Rejected {
        status: StatusCode,
        error: OAuthErrorResponse,
    },
    /// Non-success HTTP status without a parseable OAuth error
    #[error("registration returned http status: {0}")]
    #[diagnostic(code(solid_oidc::registration::http_status))]
    BadStatus(StatusCode),
    /// Response body did not decode
    #[error("malformed registration response")]
    #[diagnostic(code(solid_oidc::registration::body_decode))]
    BodyDecode(#[source] serde_json::Error),
    /// Response lacked the one field registration exists to produce
    #[error("registration response is missing `client_id`")]
    #[diagnostic(code(solid_oidc::registration::missing_client_id))]
    MissingClientId,
    /// Body serialization failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::registration::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, RegistrationError>;

// https://datatracker.ietf.org/doc/html/rfc7591#section-2
#[derive(Serialize, Debug)]
struct RegistrationBody<'a> {
    redirect_uris: Vec<&'a str>,
    application_type: &'static str,
    // one space-joined entry, matching the authorization request's
    // response_type parameter
    response_types: Vec<String>,
    grant_types: Vec<&'static str>,
    subject_type: &'static str,
    token_endpoint_auth_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_logout_redirect_uris: Option<Vec<&'a str>>,
}

/// What the provider issued for this client. Unknown response fields are
/// tolerated; only `client_id` is required.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<String>,
}

#[derive(Deserialize)]
struct RawRegistrationResponse {
    client_id: Option<String>,
    client_secret: Option<String>,
    client_secret_expires_at: Option<i64>,
    client_id_issued_at: Option<i64>,
    registration_access_token: Option<String>,
    registration_client_uri: Option<String>,
}

pub struct RegistrationRequest<'a> {
    pub endpoint: &'a Url,
    pub configuration: &'a SignInConfiguration,
    /// Bearer token for providers that gate registration.
    pub initial_access_token: Option<&'a str>,
}

impl RegistrationRequest<'_> {
    #[tracing::instrument(level = "debug", skip_all, fields(endpoint = %self.endpoint))]
    pub async fn send<T: HttpClient>(&self, client: &T) -> Result<RegistrationResponse> {
        let config = self.configuration;
        let body = RegistrationBody {
            redirect_uris: vec![config.redirect_uri.as_str()],
            application_type: "native",
            response_types: vec![config.response_type_string()],
            grant_types: config.grant_types.iter().map(|g| g.as_str()).collect(),
            subject_type: "public",
            token_endpoint_auth_method: config.authentication_method.as_str(),
            client_name: config.client_name.as_deref(),
            post_logout_redirect_uris: config
                .post_logout_redirect_uri
                .as_ref()
                .map(|uri| vec![uri.as_str()]),
        };
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(token) = self.initial_access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let request = request.body(serde_json::to_vec(&body)?)?;
        let response = client
            .send_http(request)
            .await
            .map_err(|e| RegistrationError::Transport(Box::new(e)))?;
        let status = response.status();
        if !status.is_success() {
            if let Ok(error) = serde_json::from_slice::<OAuthErrorResponse>(response.body()) {
                return Err(RegistrationError::Rejected { status, error });
            }
            return Err(RegistrationError::BadStatus(status));
        }
        let raw: RawRegistrationResponse =
            serde_json::from_slice(response.body()).map_err(RegistrationError::BodyDecode)?;
        let Some(client_id) = raw.client_id else {
            return Err(RegistrationError::MissingClientId);
        };
        Ok(RegistrationResponse {
            client_id,
            client_secret: raw.client_secret,
            client_secret_expires_at: raw.client_secret_expires_at,
            client_id_issued_at: raw.client_id_issued_at,
            registration_access_token: raw.registration_access_token,
            registration_client_uri: raw.registration_client_uri,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClient;

    fn configuration() -> SignInConfiguration {
        let mut config = SignInConfiguration::new(
            Url::parse("https://issuer.example").unwrap(),
            Url::parse("com.example.app://callback").unwrap(),
        );
        config.client_name = Some("Example App".into());
        config.post_logout_redirect_uri = Some(Url::parse("com.example.app://logout").unwrap());
        config
    }

    fn endpoint() -> Url {
        Url::parse("https://issuer.example/register").unwrap()
    }

    #[tokio::test]
    async fn registers_and_parses_response() {
        let client = MockClient::with_json(
            201,
            serde_json::json!({
                "client_id": "client-1",
                "client_secret": "s3cret",
                "client_secret_expires_at": 0,
                // unknown fields must be tolerated
                "provider_specific_extension": {"x": 1}
            }),
        );
        let config = configuration();
        let response = RegistrationRequest {
            endpoint: &endpoint(),
            configuration: &config,
            initial_access_token: Some("reg-token"),
        }
        .send(&client)
        .await
        .unwrap();
        assert_eq!(response.client_id, "client-1");
        assert_eq!(response.client_secret.as_deref(), Some("s3cret"));

        let (parts, body) = client.last_request();
        assert_eq!(parts.method, Method::POST);
        assert_eq!(
            parts.headers.get("Authorization").unwrap(),
            "Bearer reg-token"
        );
        let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent["application_type"], "native");
        assert_eq!(sent["response_types"], serde_json::json!(["code"]));
        assert_eq!(
            sent["grant_types"],
            serde_json::json!(["authorization_code", "refresh_token"])
        );
        assert_eq!(
            sent["redirect_uris"],
            serde_json::json!(["com.example.app://callback"])
        );
        assert_eq!(
            sent["post_logout_redirect_uris"],
            serde_json::json!(["com.example.app://logout"])
        );
        assert_eq!(sent["token_endpoint_auth_method"], "client_secret_basic");
    }

    #[tokio::test]
    async fn oauth_error_body_is_surfaced() {
        let client = MockClient::with_json(
            400,
            serde_json::json!({
                "error": "invalid_redirect_uri",
                "error_description": "redirect_uris must use a registered scheme"
            }),
        );
        let config = configuration();
        let err = RegistrationRequest {
            endpoint: &endpoint(),
            configuration: &config,
            initial_access_token: None,
        }
        .send(&client)
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Rejected { status, ref error }
                if status.as_u16() == 400 && error.error == "invalid_redirect_uri"
        ));
    }

    #[tokio::test]
    async fn missing_client_id_is_an_error() {
        let client = MockClient::with_json(201, serde_json::json!({"client_secret": "s3cret"}));
        let config = configuration();
        let err = RegistrationRequest {
            endpoint: &endpoint(),
            configuration: &config,
            initial_access_token: None,
        }
        .send(&client)
        .await
        .unwrap_err();
        assert!(matches!(err, RegistrationError::MissingClientId));
    }
}
