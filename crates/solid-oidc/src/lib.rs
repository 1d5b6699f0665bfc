//! Client-side Solid-OIDC authentication: provider discovery, dynamic client
//! registration, the authorization code flow with PKCE, DPoP-bound token
//! requests, and ID token validation against the provider's JWKS.
//!
//! The [`signin::SignInController`] drives the whole flow; the lower-level
//! modules are usable on their own.

pub mod authorization;
pub mod discovery;
pub mod dpop;
pub mod http_client;
pub mod jose;
pub mod jwk;
pub mod logout;
pub mod registration;
pub mod signin;
pub mod storage;
pub mod token;
pub mod types;
pub mod userinfo;
pub mod utils;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use http_client::HttpClient;
pub use signin::{SignInController, SignInSession, SignInState};
pub use types::config::SignInConfiguration;
