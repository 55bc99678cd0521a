//! Provider endpoint registry and Harbor's own client credentials.
//!
//! The provider set is fixed: Google, GitHub, Microsoft, Slack. Harbor's
//! client credentials for `host` mode are read from the environment at helper
//! start (`HARBOR_<PROVIDER>_CLIENT_ID` / `_CLIENT_SECRET`).

use crate::capabilities::{HostCapabilities, ProviderCapabilities};

/// Fixed local port for the loopback OAuth callback.
pub const CALLBACK_PORT: u16 = 8976;

pub fn redirect_uri() -> String {
    format!("http://127.0.0.1:{CALLBACK_PORT}/auth/callback")
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub name: &'static str,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub default_scopes: &'static [&'static str],
    /// Public clients use PKCE; confidential clients send the secret.
    pub public_client: bool,
}

const GOOGLE: ProviderEndpoints = ProviderEndpoints {
    name: "google",
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    default_scopes: &["openid", "email"],
    public_client: false,
};

const GITHUB: ProviderEndpoints = ProviderEndpoints {
    name: "github",
    auth_url: "https://github.com/login/oauth/authorize",
    token_url: "https://github.com/login/oauth/access_token",
    default_scopes: &["read:user"],
    public_client: false,
};

const MICROSOFT: ProviderEndpoints = ProviderEndpoints {
    name: "microsoft",
    auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
    token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
    default_scopes: &["openid", "offline_access"],
    public_client: true,
};

const SLACK: ProviderEndpoints = ProviderEndpoints {
    name: "slack",
    auth_url: "https://slack.com/oauth/v2/authorize",
    token_url: "https://slack.com/api/oauth.v2.access",
    default_scopes: &[],
    public_client: false,
};

pub const ALL_PROVIDERS: [&ProviderEndpoints; 4] = [&GOOGLE, &GITHUB, &MICROSOFT, &SLACK];

pub fn provider_endpoints(name: &str) -> Option<&'static ProviderEndpoints> {
    ALL_PROVIDERS
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Read Harbor's configured providers from the environment.
///
/// A provider is "configured" for `host` mode when its client id is present.
/// Scopes and APIs Harbor is allowed to ask for come from
/// `HARBOR_<PROVIDER>_SCOPES` / `HARBOR_<PROVIDER>_APIS` (comma-separated).
pub fn host_capabilities_from_env() -> HostCapabilities {
    let mut caps = HostCapabilities::default();
    for provider in ALL_PROVIDERS {
        let upper = provider.name.to_uppercase();
        let Ok(client_id) = std::env::var(format!("HARBOR_{upper}_CLIENT_ID")) else {
            continue;
        };
        if client_id.is_empty() {
            continue;
        }
        let client_secret = std::env::var(format!("HARBOR_{upper}_CLIENT_SECRET")).ok();
        let available_scopes = csv_env(&format!("HARBOR_{upper}_SCOPES"));
        let enabled_apis = csv_env(&format!("HARBOR_{upper}_APIS"));
        caps.providers.insert(provider.name.to_string(), ProviderCapabilities {
            client_id,
            client_secret,
            available_scopes,
            enabled_apis,
        });
    }
    caps
}

fn csv_env(key: &str) -> std::collections::HashSet<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
