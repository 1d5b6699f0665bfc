pub mod config;
pub mod metadata;
pub mod params;
pub mod response;

pub use config::{AuthenticationMethod, GrantType, ResponseType, Scope, SignInConfiguration};
pub use metadata::ProviderConfiguration;
pub use params::{CodeParameters, RefreshParameters, ServerParameters};
pub use response::{OAuthErrorResponse, TokenResponse};
