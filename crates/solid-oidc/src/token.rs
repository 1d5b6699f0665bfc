//! Token endpoint client: authorization code exchange and refresh, with
//! basic/post/none client authentication and optional DPoP binding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::dpop::{self, DPOP_HEADER, DpopError};
use crate::http_client::{BoxError, HttpClient};
use crate::jwk::ClientKey;
use crate::types::config::AuthenticationMethod;
use crate::types::response::{OAuthErrorResponse, TokenResponse};
use crate::types::{CodeParameters, RefreshParameters};

/// Errors from token endpoint requests.
#[derive(Debug, Error, Diagnostic)]
pub enum TokenError {
    /// Network-level failure
    #[error("transport error during token request")]
    #[diagnostic(code(solid_oidc::token::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::token::http_build))]
    HttpBuild(#[from] http::Error),
    /// Form body serialization failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::token::serde_form))]
    Form(#[from] serde_html_form::ser::Error),
    /// DPoP proof generation failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] DpopError),
    /// Non-success HTTP status, with the OAuth error body when parseable
    #[error("token endpoint returned http status: {status}")]
    #[diagnostic(
        code(solid_oidc::token::http_status),
        help("inspect `error` and `error_description` when present")
    )]
    BadStatus {
        status: StatusCode,
        error: Option<OAuthErrorResponse>,
    },
    /// Success status but the body did not decode
    #[error("malformed token response")]
    #[diagnostic(code(solid_oidc::token::body_decode))]
    BodyDecode(#[source] serde_json::Error),
    /// Success status but no access token in the body
    #[error("token response is missing `access_token`")]
    #[diagnostic(code(solid_oidc::token::missing_token))]
    MissingExpectedToken,
}

pub type Result<T> = core::result::Result<T, TokenError>;

/// A request to the token endpoint.
pub enum TokenRequest {
    Code(CodeParameters),
    Refresh(RefreshParameters),
}

impl TokenRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Code(_) => "token",
            Self::Refresh(_) => "refresh",
        }
    }

    pub fn endpoint(&self) -> &Url {
        match self {
            Self::Code(params) => &params.token_endpoint,
            Self::Refresh(params) => &params.token_endpoint,
        }
    }

    fn client_id(&self) -> &str {
        match self {
            Self::Code(params) => &params.client_id,
            Self::Refresh(params) => &params.client_id,
        }
    }

    fn client_secret(&self) -> Option<&str> {
        match self {
            Self::Code(params) => params.client_secret.as_deref(),
            Self::Refresh(params) => params.client_secret.as_deref(),
        }
    }

    fn authentication_method(&self) -> AuthenticationMethod {
        match self {
            Self::Code(params) => params.authentication_method,
            Self::Refresh(params) => params.authentication_method,
        }
    }
}

#[derive(Serialize, Debug)]
struct TokenPayload<'a> {
    grant_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(serde::Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    scope: Option<String>,
}

/// Send a token request. `dpop_key` binds the issued tokens to the key via a
/// fresh proof; it is orthogonal to the client authentication method.
#[tracing::instrument(level = "debug", skip_all, fields(request = request.name()))]
pub async fn send<T: HttpClient>(
    client: &T,
    request: &TokenRequest,
    dpop_key: Option<&ClientKey>,
) -> Result<TokenResponse> {
    // `client_secret_basic` moves the secret into the Authorization header;
    // `client_secret_post` keeps it in the body; `none` sends neither.
    let method = request.authentication_method();
    let body_secret = match method {
        AuthenticationMethod::Post => request.client_secret(),
        AuthenticationMethod::Basic | AuthenticationMethod::None => None,
    };
    let payload = match request {
        TokenRequest::Code(params) => TokenPayload {
            grant_type: "authorization_code",
            code: Some(&params.code),
            redirect_uri: Some(params.redirect_uri.as_str()),
            code_verifier: Some(&params.code_verifier),
            refresh_token: None,
            client_id: request.client_id(),
            client_secret: body_secret,
        },
        TokenRequest::Refresh(params) => TokenPayload {
            grant_type: "refresh_token",
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: Some(&params.refresh_token),
            client_id: request.client_id(),
            client_secret: body_secret,
        },
    };
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(request.endpoint().as_str())
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json");
    if method == AuthenticationMethod::Basic {
        if let Some(secret) = request.client_secret() {
            let credentials = STANDARD.encode(format!("{}:{secret}", request.client_id()));
            builder = builder.header("Authorization", format!("Basic {credentials}"));
        }
    }
    if let Some(key) = dpop_key {
        let proof = dpop::build_dpop_proof(key, &Method::POST, request.endpoint(), None)?;
        builder = builder.header(DPOP_HEADER, proof);
    }
    let http_request = builder.body(serde_html_form::to_string(&payload)?.into_bytes())?;
    let response = client
        .send_http(http_request)
        .await
        .map_err(|e| TokenError::Transport(Box::new(e)))?;
    let status = response.status();
    if !status.is_success() {
        let error = serde_json::from_slice::<OAuthErrorResponse>(response.body()).ok();
        return Err(TokenError::BadStatus { status, error });
    }
    let raw: RawTokenResponse =
        serde_json::from_slice(response.body()).map_err(TokenError::BodyDecode)?;
    let Some(access_token) = raw.access_token else {
        return Err(TokenError::MissingExpectedToken);
    };
    Ok(TokenResponse {
        access_token,
        token_type: raw.token_type,
        expires_in: raw.expires_in,
        refresh_token: raw.refresh_token,
        id_token: raw.id_token,
        scope: raw.scope,
    })
}

impl TokenResponse {
    /// Derive the parameters a later refresh needs, carrying over endpoint,
    /// client identity, and authentication method from the code exchange.
    /// `None` when the provider issued no refresh token.
    pub fn refresh_parameters(&self, code: &CodeParameters) -> Option<RefreshParameters> {
        let refresh_token = self.refresh_token.clone()?;
        Some(RefreshParameters {
            token_endpoint: code.token_endpoint.clone(),
            refresh_token,
            client_id: code.client_id.clone(),
            client_secret: code.client_secret.clone(),
            authentication_method: code.authentication_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpop::ProofClaims;
    use crate::jose::decode_unverified_claims;
    use crate::testing::MockClient;

    fn code_parameters(method: AuthenticationMethod) -> CodeParameters {
        CodeParameters {
            token_endpoint: Url::parse("https://issuer.example/token").unwrap(),
            code_verifier: "verifier-1".into(),
            code: "auth-code-1".into(),
            redirect_uri: Url::parse("com.example.app://callback").unwrap(),
            client_id: "client-1".into(),
            client_secret: Some("s3cret".into()),
            authentication_method: method,
        }
    }

    fn token_json() -> serde_json::Value {
        serde_json::json!({
            "access_token": "access-1",
            "token_type": "DPoP",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "id_token": "a.b.c"
        })
    }

    #[tokio::test]
    async fn basic_auth_uses_header_and_omits_secret_from_body() {
        let client = MockClient::with_json(200, token_json());
        let request = TokenRequest::Code(code_parameters(AuthenticationMethod::Basic));
        let response = send(&client, &request, None).await.unwrap();
        assert_eq!(response.access_token, "access-1");

        let (parts, _) = client.last_request();
        let auth = parts.headers.get("Authorization").unwrap().to_str().unwrap();
        assert_eq!(
            auth,
            format!("Basic {}", STANDARD.encode("client-1:s3cret"))
        );
        let body = client.last_body_string();
        assert!(body.contains("grant_type=authorization_code"));
        assert!(body.contains("code=auth-code-1"));
        assert!(body.contains("code_verifier=verifier-1"));
        assert!(body.contains("client_id=client-1"));
        assert!(!body.contains("client_secret"));
    }

    #[tokio::test]
    async fn post_auth_puts_secret_in_body() {
        let client = MockClient::with_json(200, token_json());
        let request = TokenRequest::Code(code_parameters(AuthenticationMethod::Post));
        send(&client, &request, None).await.unwrap();

        let (parts, _) = client.last_request();
        assert!(parts.headers.get("Authorization").is_none());
        assert!(client.last_body_string().contains("client_secret=s3cret"));
    }

    #[tokio::test]
    async fn none_auth_sends_neither() {
        let client = MockClient::with_json(200, token_json());
        let mut params = code_parameters(AuthenticationMethod::None);
        params.client_secret = None;
        send(&client, &TokenRequest::Code(params), None).await.unwrap();

        let (parts, _) = client.last_request();
        assert!(parts.headers.get("Authorization").is_none());
        assert!(!client.last_body_string().contains("client_secret"));
    }

    #[tokio::test]
    async fn dpop_key_adds_a_proof_bound_to_the_endpoint() {
        let client = MockClient::with_json(200, token_json());
        let key = ClientKey::generate_es256();
        let request = TokenRequest::Code(code_parameters(AuthenticationMethod::Basic));
        send(&client, &request, Some(&key)).await.unwrap();

        let (parts, _) = client.last_request();
        let proof = parts.headers.get(DPOP_HEADER).unwrap().to_str().unwrap();
        let claims: ProofClaims = decode_unverified_claims(proof).unwrap();
        assert_eq!(claims.htm, "POST");
        assert_eq!(claims.htu, "https://issuer.example/token");
        assert!(claims.ath.is_none());
    }

    #[tokio::test]
    async fn refresh_request_body() {
        let client = MockClient::with_json(200, token_json());
        let request = TokenRequest::Refresh(RefreshParameters {
            token_endpoint: Url::parse("https://issuer.example/token").unwrap(),
            refresh_token: "refresh-0".into(),
            client_id: "client-1".into(),
            client_secret: None,
            authentication_method: AuthenticationMethod::None,
        });
        send(&client, &request, None).await.unwrap();

        let body = client.last_body_string();
        assert!(body.contains("grant_type=refresh_token"));
        assert!(body.contains("refresh_token=refresh-0"));
        assert!(!body.contains("code="));
    }

    #[tokio::test]
    async fn missing_access_token_is_its_own_error() {
        let client = MockClient::with_json(200, serde_json::json!({"token_type": "Bearer"}));
        let request = TokenRequest::Code(code_parameters(AuthenticationMethod::Basic));
        let err = send(&client, &request, None).await.unwrap_err();
        assert!(matches!(err, TokenError::MissingExpectedToken));
    }

    #[tokio::test]
    async fn oauth_error_body_is_attached_to_bad_status() {
        let client = MockClient::with_json(
            400,
            serde_json::json!({"error": "invalid_grant", "error_description": "code expired"}),
        );
        let request = TokenRequest::Code(code_parameters(AuthenticationMethod::Basic));
        let err = send(&client, &request, None).await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::BadStatus { status, error: Some(ref e) }
                if status.as_u16() == 400 && e.error == "invalid_grant"
        ));
    }

    #[test]
    fn refresh_parameters_carry_over_client_identity() {
        let code = code_parameters(AuthenticationMethod::Basic);
        let response = TokenResponse {
            access_token: "access-1".into(),
            token_type: Some("DPoP".into()),
            expires_in: Some(3600),
            refresh_token: Some("refresh-1".into()),
            id_token: None,
            scope: None,
        };
        let refresh = response.refresh_parameters(&code).unwrap();
        assert_eq!(refresh.token_endpoint, code.token_endpoint);
        assert_eq!(refresh.refresh_token, "refresh-1");
        assert_eq!(refresh.client_id, code.client_id);
        assert_eq!(refresh.client_secret, code.client_secret);
        assert_eq!(refresh.authentication_method, code.authentication_method);

        let no_refresh = TokenResponse {
            refresh_token: None,
            ..response
        };
        assert!(no_refresh.refresh_parameters(&code).is_none());
    }
}
