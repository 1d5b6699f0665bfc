//! Sign-in orchestrator: one controller driving discovery, registration,
//! authorization, token exchange, and storage resolution in order.

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::authorization::{AuthorizationError, AuthorizationRequest, UserAgent};
use crate::discovery::{self, DiscoveryError};
use crate::http_client::HttpClient;
use crate::jwk::ClientKey;
use crate::logout::{LogoutError, LogoutRequest};
use crate::registration::{RegistrationError, RegistrationRequest};
use crate::storage;
use crate::token::{self, TokenError, TokenRequest};
use crate::types::config::ConfigError;
use crate::types::response::TokenResponse;
use crate::types::{
    CodeParameters, ProviderConfiguration, RefreshParameters, ServerParameters,
    SignInConfiguration,
};
use crate::validate::{self, ValidateError};

/// Where the controller is in the pipeline. Exactly one state at a time;
/// nothing about progress lives outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignInState {
    #[default]
    Idle,
    DiscoveringProvider,
    RegisteringClient,
    AwaitingAuthorization,
    ExchangingTokens,
    ResolvingStorageLocation,
    Complete,
    Failed,
}

impl SignInState {
    pub fn name(&self) -> &'static str {
        match self {
            SignInState::Idle => "idle",
            SignInState::DiscoveringProvider => "discovering_provider",
            SignInState::RegisteringClient => "registering_client",
            SignInState::AwaitingAuthorization => "awaiting_authorization",
            SignInState::ExchangingTokens => "exchanging_tokens",
            SignInState::ResolvingStorageLocation => "resolving_storage_location",
            SignInState::Complete => "complete",
            SignInState::Failed => "failed",
        }
    }
}

/// Errors from the sign-in pipeline. The first failing stage halts the flow;
/// there are no retries.
#[derive(Debug, Error, Diagnostic)]
pub enum SignInError {
    /// Configuration failed validation
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    /// Provider discovery failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Discovery(#[from] DiscoveryError),
    /// The provider does not offer dynamic registration
    #[error("provider has no registration endpoint")]
    #[diagnostic(
        code(solid_oidc::signin::no_registration_endpoint),
        help("this flow requires dynamic client registration")
    )]
    NoRegistrationEndpoint,
    /// Client registration failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),
    /// Authorization failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Authorization(AuthorizationError),
    /// The user backed out; not a protocol or network failure
    #[error("sign-in canceled by the user")]
    #[diagnostic(code(solid_oidc::signin::canceled))]
    Canceled,
    /// Token exchange failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Token(#[from] TokenError),
    /// A token that should identify the user did not decode
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validate(#[from] ValidateError),
    /// Neither token carried a webid or subject
    #[error("tokens carry no webid or subject claim")]
    #[diagnostic(code(solid_oidc::signin::missing_identity))]
    MissingIdentity,
    /// The provider does not offer RP-initiated logout
    #[error("provider has no end_session_endpoint")]
    #[diagnostic(code(solid_oidc::signin::no_end_session_endpoint))]
    NoEndSessionEndpoint,
    /// Logout failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Logout(LogoutError),
}

impl From<AuthorizationError> for SignInError {
    fn from(error: AuthorizationError) -> Self {
        match error {
            AuthorizationError::Canceled => SignInError::Canceled,
            other => SignInError::Authorization(other),
        }
    }
}

impl From<LogoutError> for SignInError {
    fn from(error: LogoutError) -> Self {
        match error {
            LogoutError::Canceled => SignInError::Canceled,
            other => SignInError::Logout(other),
        }
    }
}

pub type Result<T> = core::result::Result<T, SignInError>;

/// A completed sign-in: tokens, the user's identity, and everything a later
/// refresh needs.
#[derive(Debug, Clone)]
pub struct SignInSession {
    pub provider: ProviderConfiguration,
    pub tokens: TokenResponse,
    pub webid: String,
    pub storage_iri: Option<Url>,
    pub code_parameters: CodeParameters,
    pub refresh: Option<RefreshParameters>,
}

impl SignInSession {
    /// Handoff bundle for a backend. `None` when the provider issued no
    /// refresh token.
    pub fn server_parameters(&self) -> Option<ServerParameters> {
        Some(ServerParameters {
            refresh: self.refresh.clone()?,
            storage_iri: self.storage_iri.clone(),
            jwks_url: self.provider.jwks_uri.clone(),
            webid: self.webid.clone(),
        })
    }
}

/// Drives the sign-in pipeline. Owns the in-flight state; callers own the
/// HTTP client, the configuration, and (optionally) a DPoP key.
pub struct SignInController<T: HttpClient> {
    client: T,
    configuration: SignInConfiguration,
    dpop_key: Option<ClientKey>,
    state: SignInState,
}

impl<T: HttpClient> SignInController<T> {
    pub fn new(client: T, configuration: SignInConfiguration) -> Self {
        Self {
            client,
            configuration,
            dpop_key: None,
            state: SignInState::Idle,
        }
    }

    /// Bind token requests to this key with DPoP proofs. Independent of the
    /// client authentication method.
    pub fn with_dpop_key(mut self, key: ClientKey) -> Self {
        self.dpop_key = Some(key);
        self
    }

    pub fn state(&self) -> SignInState {
        self.state
    }

    pub fn configuration(&self) -> &SignInConfiguration {
        &self.configuration
    }

    fn advance(&mut self, state: SignInState) {
        debug!(from = self.state.name(), to = state.name(), "sign-in stage");
        self.state = state;
    }

    /// Run the whole pipeline. On return the controller is `Complete` or
    /// `Failed`; a failed controller can run `sign_in` again from scratch.
    pub async fn sign_in<U: UserAgent>(&mut self, user_agent: &U) -> Result<SignInSession> {
        let result = self.run(user_agent).await;
        self.state = match &result {
            Ok(_) => SignInState::Complete,
            Err(_) => SignInState::Failed,
        };
        result
    }

    async fn run<U: UserAgent>(&mut self, user_agent: &U) -> Result<SignInSession> {
        self.configuration.validate()?;

        self.advance(SignInState::DiscoveringProvider);
        let provider =
            discovery::fetch_provider_configuration(&self.client, &self.configuration.issuer)
                .await?;

        self.advance(SignInState::RegisteringClient);
        let registration_endpoint = provider
            .registration_endpoint
            .as_ref()
            .ok_or(SignInError::NoRegistrationEndpoint)?;
        let registration = RegistrationRequest {
            endpoint: registration_endpoint,
            configuration: &self.configuration,
            initial_access_token: None,
        }
        .send(&self.client)
        .await?;

        self.advance(SignInState::AwaitingAuthorization);
        let request =
            AuthorizationRequest::new(&provider, &registration.client_id, &self.configuration)?;
        let response = request
            .authorize(user_agent, self.configuration.ephemeral_session)
            .await?;

        self.advance(SignInState::ExchangingTokens);
        let code_parameters = CodeParameters {
            token_endpoint: provider.token_endpoint.clone(),
            code_verifier: request.code_verifier().to_owned(),
            code: response.code,
            redirect_uri: self.configuration.redirect_uri.clone(),
            client_id: registration.client_id.clone(),
            client_secret: registration.client_secret.clone(),
            authentication_method: self.configuration.authentication_method,
        };
        let tokens = token::send(
            &self.client,
            &TokenRequest::Code(code_parameters.clone()),
            self.dpop_key.as_ref(),
        )
        .await?;

        // The key set may not even be published for the flow's own tokens
        // yet, so the identity comes from an unverified decode. The ID token
        // is authoritative when present.
        let webid = match tokens.id_token.as_deref() {
            Some(id_token) => validate::decode_unverified(id_token)?
                .identity()
                .map(str::to_owned),
            None => validate::decode_unverified(&tokens.access_token)
                .ok()
                .and_then(|claims| claims.identity().map(str::to_owned)),
        }
        .ok_or(SignInError::MissingIdentity)?;

        self.advance(SignInState::ResolvingStorageLocation);
        let storage_iri = match Url::parse(&webid) {
            Ok(webid_url) => match storage::fetch_storage_iri(&self.client, &webid_url).await {
                Ok(iri) => iri,
                Err(error) => {
                    warn!(%error, "storage lookup failed; continuing without it");
                    None
                }
            },
            Err(_) => None,
        };

        let refresh = tokens.refresh_parameters(&code_parameters);
        Ok(SignInSession {
            provider,
            tokens,
            webid,
            storage_iri,
            code_parameters,
            refresh,
        })
    }

    /// RP-initiated logout through the user agent, always ephemeral.
    pub async fn sign_out<U: UserAgent>(
        &self,
        user_agent: &U,
        id_token: Option<&str>,
    ) -> Result<()> {
        let provider =
            discovery::fetch_provider_configuration(&self.client, &self.configuration.issuer)
                .await?;
        let end_session_endpoint = provider
            .end_session_endpoint
            .ok_or(SignInError::NoEndSessionEndpoint)?;
        LogoutRequest {
            end_session_endpoint,
            id_token_hint: id_token.map(str::to_owned),
            post_logout_redirect_uri: self.configuration.post_logout_redirect_uri.clone(),
        }
        .logout(user_agent)
        .await?;
        Ok(())
    }
}
