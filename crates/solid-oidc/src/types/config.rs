//! Sign-in configuration and the small closed vocabularies it is built from.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// OIDC scopes this client requests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    #[serde(rename = "openid")]
    OpenId,
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "webid")]
    WebId,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "address")]
    Address,
    #[serde(rename = "phone")]
    Phone,
    #[serde(rename = "offline_access")]
    OfflineAccess,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::OpenId => "openid",
            Scope::Profile => "profile",
            Scope::WebId => "webid",
            Scope::Email => "email",
            Scope::Address => "address",
            Scope::Phone => "phone",
            Scope::OfflineAccess => "offline_access",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "id_token")]
    IdToken,
    #[serde(rename = "token")]
    Token,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::IdToken => "id_token",
            ResponseType::Token => "token",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "implicit")]
    Implicit,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Implicit => "implicit",
        }
    }
}

/// Client authentication at the token endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationMethod {
    #[serde(rename = "client_secret_basic")]
    #[default]
    Basic,
    #[serde(rename = "client_secret_post")]
    Post,
    #[serde(rename = "none")]
    None,
}

impl AuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationMethod::Basic => "client_secret_basic",
            AuthenticationMethod::Post => "client_secret_post",
            AuthenticationMethod::None => "none",
        }
    }
}

/// Configuration errors caught before any network traffic.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Scope set is empty
    #[error("no scopes configured")]
    #[diagnostic(
        code(solid_oidc::config::no_scopes),
        help("at least the `openid` scope is required")
    )]
    NoScopes,
    /// `openid` is missing from the scope set
    #[error("scope set does not include `openid`")]
    #[diagnostic(code(solid_oidc::config::missing_openid))]
    MissingOpenIdScope,
    /// Response type set is empty
    #[error("no response types configured")]
    #[diagnostic(code(solid_oidc::config::no_response_types))]
    NoResponseTypes,
    /// A single response type other than `code` was requested
    #[error("a lone response type must be `code`")]
    #[diagnostic(
        code(solid_oidc::config::response_types),
        help("this client implements the authorization code flow")
    )]
    UnsupportedResponseTypes,
}

/// Everything the sign-in flow needs to know about this client up front.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignInConfiguration {
    pub issuer: Url,
    pub redirect_uri: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_logout_redirect_uri: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub scopes: Vec<Scope>,
    pub response_types: Vec<ResponseType>,
    pub grant_types: Vec<GrantType>,
    pub authentication_method: AuthenticationMethod,
    /// Ask the user agent for a session that leaves no cookies behind.
    #[serde(default)]
    pub ephemeral_session: bool,
}

impl SignInConfiguration {
    pub fn new(issuer: Url, redirect_uri: Url) -> Self {
        Self {
            issuer,
            redirect_uri,
            post_logout_redirect_uri: None,
            client_name: None,
            scopes: vec![Scope::OpenId, Scope::WebId, Scope::OfflineAccess],
            response_types: vec![ResponseType::Code],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            authentication_method: AuthenticationMethod::Basic,
            ephemeral_session: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scopes.is_empty() {
            return Err(ConfigError::NoScopes);
        }
        if !self.scopes.contains(&Scope::OpenId) {
            return Err(ConfigError::MissingOpenIdScope);
        }
        match self.response_types.as_slice() {
            [] => Err(ConfigError::NoResponseTypes),
            [only] if *only != ResponseType::Code => Err(ConfigError::UnsupportedResponseTypes),
            _ => Ok(()),
        }
    }

    /// Space-joined scope value for request parameters.
    pub fn scope_string(&self) -> String {
        self.scopes
            .iter()
            .map(Scope::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Space-joined response type value for request parameters.
    pub fn response_type_string(&self) -> String {
        self.response_types
            .iter()
            .map(ResponseType::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SignInConfiguration {
        SignInConfiguration::new(
            Url::parse("https://issuer.example").unwrap(),
            Url::parse("com.example.app://callback").unwrap(),
        )
    }

    #[test]
    fn default_configuration_is_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn empty_scopes_rejected() {
        let mut cfg = config();
        cfg.scopes.clear();
        assert!(matches!(cfg.validate().unwrap_err(), ConfigError::NoScopes));
    }

    #[test]
    fn openid_scope_required() {
        let mut cfg = config();
        cfg.scopes = vec![Scope::Profile];
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::MissingOpenIdScope
        ));
    }

    #[test]
    fn lone_non_code_response_type_rejected() {
        let mut cfg = config();
        cfg.response_types = vec![ResponseType::IdToken];
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::UnsupportedResponseTypes
        ));
        // combined with code it is allowed
        cfg.response_types = vec![ResponseType::Code, ResponseType::IdToken];
        cfg.validate().unwrap();
    }

    #[test]
    fn scope_string_is_space_joined() {
        assert_eq!(config().scope_string(), "openid webid offline_access");
    }
}
