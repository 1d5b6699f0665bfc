//! Authorization request construction (PKCE, state, nonce), callback
//! parsing, and the user-agent seam that presents the request to the user.

use std::future::Future;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::http_client::BoxError;
use crate::types::config::ConfigError;
use crate::types::response::OAuthErrorResponse;
use crate::types::{ProviderConfiguration, SignInConfiguration};
use crate::utils::{
    EncodingError, generate_code_verifier, generate_nonce, generate_state, pkce_challenge,
};

/// Errors from building the authorization request or handling its callback.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthorizationError {
    /// Configuration failed validation
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    /// State/nonce/verifier generation failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Entropy(#[from] EncodingError),
    /// The provider's authorization endpoint is not a URL
    #[error("authorization endpoint is not a valid URL")]
    #[diagnostic(code(solid_oidc::authorization::endpoint))]
    InvalidEndpoint(#[source] url::ParseError),
    /// Query serialization failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::authorization::query))]
    Query(#[from] serde_html_form::ser::Error),
    /// The callback URL does not target this request's redirect URI
    #[error("callback URL is not for this authorization request")]
    #[diagnostic(
        code(solid_oidc::authorization::not_handled),
        help("deliver the URL to whichever flow registered its redirect URI")
    )]
    NotHandled,
    /// Callback query did not parse
    #[error("malformed callback query")]
    #[diagnostic(code(solid_oidc::authorization::callback_query))]
    MalformedCallback(#[source] serde_html_form::de::Error),
    /// The provider returned an OAuth error
    #[error("authorization failed: {}", error.error)]
    #[diagnostic(code(solid_oidc::authorization::provider))]
    Provider { error: OAuthErrorResponse },
    /// Returned state does not match the pending request
    #[error("state mismatch in authorization response")]
    #[diagnostic(
        code(solid_oidc::authorization::state_mismatch),
        help("possible CSRF; discard the response")
    )]
    StateMismatch,
    /// No authorization code in an otherwise well-formed response
    #[error("authorization response is missing `code`")]
    #[diagnostic(code(solid_oidc::authorization::missing_code))]
    MissingCode,
    /// The user dismissed the user agent without completing authorization
    #[error("authorization canceled by the user")]
    #[diagnostic(code(solid_oidc::authorization::canceled))]
    Canceled,
    /// The user agent itself failed
    #[error("user agent error")]
    #[diagnostic(code(solid_oidc::authorization::user_agent))]
    UserAgent(#[source] BoxError),
}

pub type Result<T> = core::result::Result<T, AuthorizationError>;

/// What the user agent is asked to present.
#[derive(Debug, Clone)]
pub struct PresentationRequest {
    pub url: Url,
    /// Scheme of the redirect URI the agent should intercept.
    pub callback_scheme: String,
    pub ephemeral_session: bool,
}

/// How the user agent run ended.
#[derive(Debug, Clone)]
pub enum UserAgentOutcome {
    /// The provider redirected to the client's redirect URI.
    Redirect(Url),
    /// The user dismissed the session.
    Canceled,
}

/// External collaborator that shows the authorization URL to the user and
/// reports the redirect. Implementations own all UI concerns.
#[trait_variant::make(Send)]
pub trait UserAgent {
    type Error: std::error::Error + Send + Sync + 'static;

    fn present(
        &self,
        request: &PresentationRequest,
    ) -> impl Future<Output = core::result::Result<UserAgentOutcome, Self::Error>>;
}

#[derive(Serialize, Debug)]
struct AuthorizeParams<'a> {
    response_type: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    state: &'a str,
    nonce: &'a str,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
}

#[derive(Deserialize, Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    error_uri: Option<String>,
}

/// Successful authorization response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
}

/// One pending authorization request. The PKCE verifier, state, and nonce are
/// generated at construction and live exactly as long as this value.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    authorization_endpoint: Url,
    redirect_uri: Url,
    client_id: String,
    scope: String,
    response_type: String,
    state: String,
    nonce: String,
    code_verifier: String,
}

impl AuthorizationRequest {
    pub fn new(
        provider: &ProviderConfiguration,
        client_id: &str,
        config: &SignInConfiguration,
    ) -> Result<Self> {
        config.validate()?;
        let authorization_endpoint = Url::parse(&provider.authorization_endpoint)
            .map_err(AuthorizationError::InvalidEndpoint)?;
        Ok(Self {
            authorization_endpoint,
            redirect_uri: config.redirect_uri.clone(),
            client_id: client_id.to_owned(),
            scope: config.scope_string(),
            response_type: config.response_type_string(),
            state: generate_state()?,
            nonce: generate_nonce()?,
            code_verifier: generate_code_verifier()?,
        })
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    /// The challenge is always derived from the verifier, never generated
    /// independently.
    pub fn code_challenge(&self) -> String {
        pkce_challenge(&self.code_verifier)
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// The URL to open in the user agent. The endpoint's query is replaced
    /// wholesale with this request's parameters.
    pub fn request_url(&self) -> Result<Url> {
        let params = AuthorizeParams {
            response_type: &self.response_type,
            client_id: &self.client_id,
            redirect_uri: self.redirect_uri.as_str(),
            scope: &self.scope,
            state: &self.state,
            nonce: &self.nonce,
            code_challenge: &self.code_challenge(),
            code_challenge_method: "S256",
        };
        let mut url = self.authorization_endpoint.clone();
        url.set_query(Some(&serde_html_form::to_string(&params)?));
        Ok(url)
    }

    /// Whether a callback URL belongs to this request: equal to the redirect
    /// URI, compared case-insensitively and ignoring query and fragment.
    pub fn can_handle(&self, callback: &Url) -> bool {
        strip_query(callback).eq_ignore_ascii_case(&strip_query(&self.redirect_uri))
    }

    /// Parse and validate the provider's redirect. Order matters: provider
    /// errors surface first, then the state check, so a forged `code` never
    /// survives a state mismatch.
    pub fn parse_response(&self, callback: &Url) -> Result<AuthorizationResponse> {
        if !self.can_handle(callback) {
            return Err(AuthorizationError::NotHandled);
        }
        let params: CallbackParams = serde_html_form::from_str(callback.query().unwrap_or(""))
            .map_err(AuthorizationError::MalformedCallback)?;
        if let Some(error) = params.error {
            return Err(AuthorizationError::Provider {
                error: OAuthErrorResponse {
                    error,
                    error_description: params.error_description,
                    error_uri: params.error_uri,
                },
            });
        }
        match params.state {
            Some(state) if state == self.state => {}
            _ => return Err(AuthorizationError::StateMismatch),
        }
        let Some(code) = params.code else {
            return Err(AuthorizationError::MissingCode);
        };
        Ok(AuthorizationResponse {
            code,
            state: self.state.clone(),
        })
    }

    /// Drive the request through a user agent and parse the redirect.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn authorize<U: UserAgent>(
        &self,
        user_agent: &U,
        ephemeral_session: bool,
    ) -> Result<AuthorizationResponse> {
        let presentation = PresentationRequest {
            url: self.request_url()?,
            callback_scheme: self.redirect_uri.scheme().to_owned(),
            ephemeral_session,
        };
        match user_agent
            .present(&presentation)
            .await
            .map_err(|e| AuthorizationError::UserAgent(Box::new(e)))?
        {
            UserAgentOutcome::Redirect(callback) => self.parse_response(&callback),
            UserAgentOutcome::Canceled => Err(AuthorizationError::Canceled),
        }
    }
}

fn strip_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.into()
}
