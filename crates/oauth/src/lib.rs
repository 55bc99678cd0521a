//! OAuth broker: performs OAuth 2.0 flows on behalf of MCP servers, keeps the
//! resulting tokens in a single versioned store, refreshes them before expiry,
//! and injects them into server environments exactly as the manifest declares.

pub mod broker;
pub mod callback_server;
pub mod capabilities;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod providers;
pub mod store;
pub mod types;

pub use {
    broker::OAuthBroker,
    callback_server::CallbackServer,
    capabilities::{HostCapabilities, ProviderCapabilities, check_capabilities},
    error::{Error, Result},
    flow::{AuthorizationRequest, OAuthFlow, TokenResponse},
    providers::{CALLBACK_PORT, provider_endpoints, redirect_uri},
    store::TokenStore,
    types::{HostModeEnv, OAuthManifest, StoredTokens, TokenSource, UserModeEnv},
};

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
