//! Userinfo endpoint client. Optional profile enrichment; the sign-in flow
//! never depends on it.

use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::http_client::{BoxError, HttpClient};

/// Errors from the userinfo request.
#[derive(Debug, Error, Diagnostic)]
pub enum UserInfoError {
    /// Network-level failure
    #[error("transport error during userinfo request")]
    #[diagnostic(code(solid_oidc::userinfo::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::userinfo::http_build))]
    HttpBuild(#[from] http::Error),
    /// Non-success HTTP status
    #[error("userinfo returned http status: {0}")]
    #[diagnostic(code(solid_oidc::userinfo::http_status))]
    BadStatus(StatusCode),
    /// Body did not decode
    #[error("malformed userinfo response")]
    #[diagnostic(code(solid_oidc::userinfo::body_decode))]
    BodyDecode(#[source] serde_json::Error),
    /// `sub` is the one claim the endpoint must return
    #[error("userinfo response is missing `sub`")]
    #[diagnostic(code(solid_oidc::userinfo::missing_sub))]
    MissingSubject,
}

pub type Result<T> = core::result::Result<T, UserInfoError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webid: Option<String>,
}

#[derive(Deserialize)]
struct RawUserInfo {
    sub: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
    webid: Option<String>,
}

#[tracing::instrument(level = "debug", skip_all, fields(endpoint = %endpoint))]
pub async fn fetch_userinfo<T: HttpClient>(
    client: &T,
    endpoint: &Url,
    access_token: &str,
) -> Result<UserInfo> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(endpoint.as_str())
        .header("Accept", "application/json")
        .header("Authorization", format!("Bearer {access_token}"))
        .body(Vec::new())?;
    let response = client
        .send_http(request)
        .await
        .map_err(|e| UserInfoError::Transport(Box::new(e)))?;
    if !response.status().is_success() {
        return Err(UserInfoError::BadStatus(response.status()));
    }
    let raw: RawUserInfo =
        serde_json::from_slice(response.body()).map_err(UserInfoError::BodyDecode)?;
    let Some(sub) = raw.sub else {
        return Err(UserInfoError::MissingSubject);
    };
    Ok(UserInfo {
        sub,
        name: raw.name,
        preferred_username: raw.preferred_username,
        email: raw.email,
        webid: raw.webid,
    })
}
