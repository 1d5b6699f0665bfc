//! RP-initiated logout against the provider's end-session endpoint.

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::authorization::{PresentationRequest, UserAgent, UserAgentOutcome};
use crate::http_client::BoxError;

/// Errors from the logout flow.
#[derive(Debug, Error, Diagnostic)]
pub enum LogoutError {
    /// Query serialization failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::logout::query))]
    Query(#[from] serde_html_form::ser::Error),
    /// The user dismissed the session before the provider redirected back
    #[error("logout canceled by the user")]
    #[diagnostic(code(solid_oidc::logout::canceled))]
    Canceled,
    /// The user agent itself failed
    #[error("user agent error during logout")]
    #[diagnostic(code(solid_oidc::logout::user_agent))]
    UserAgent(#[source] BoxError),
}

pub type Result<T> = core::result::Result<T, LogoutError>;

#[derive(Serialize, Debug)]
struct LogoutParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token_hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_logout_redirect_uri: Option<&'a str>,
}

// https://openid.net/specs/openid-connect-rpinitiated-1_0.html
pub struct LogoutRequest {
    pub end_session_endpoint: Url,
    pub id_token_hint: Option<String>,
    pub post_logout_redirect_uri: Option<Url>,
}

impl LogoutRequest {
    /// The end-session URL carrying the hint and return parameters.
    pub fn request_url(&self) -> Result<Url> {
        let params = LogoutParams {
            id_token_hint: self.id_token_hint.as_deref(),
            post_logout_redirect_uri: self.post_logout_redirect_uri.as_ref().map(Url::as_str),
        };
        let mut url = self.end_session_endpoint.clone();
        url.set_query(Some(&serde_html_form::to_string(&params)?));
        Ok(url)
    }

    /// Run logout through the user agent. Always an ephemeral session; the
    /// point is to drop the provider's cookies, not collect new ones.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn logout<U: UserAgent>(&self, user_agent: &U) -> Result<()> {
        let callback_scheme = self
            .post_logout_redirect_uri
            .as_ref()
            .unwrap_or(&self.end_session_endpoint)
            .scheme()
            .to_owned();
        let presentation = PresentationRequest {
            url: self.request_url()?,
            callback_scheme,
            ephemeral_session: true,
        };
        match user_agent
            .present(&presentation)
            .await
            .map_err(|e| LogoutError::UserAgent(Box::new(e)))?
        {
            UserAgentOutcome::Redirect(_) => Ok(()),
            UserAgentOutcome::Canceled => Err(LogoutError::Canceled),
        }
    }
}
