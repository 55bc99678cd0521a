use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Where the OAuth dance happens for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Harbor performs the flow with its own client credentials.
    Host,
    /// Harbor performs the flow with user-supplied credentials.
    User,
    /// The target server does OAuth itself; Harbor stays out of it.
    Server,
}

/// Env-var names a manifest declares for `host` mode injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostModeEnv {
    pub token_env_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env_var: Option<String>,
}

/// Env-var → credential-path mapping for `user` mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModeEnv {
    #[serde(default)]
    pub credential_env_vars: std::collections::HashMap<String, String>,
}

/// The OAuth section of a server manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthManifest {
    pub provider: String,
    pub supported_sources: Vec<TokenSource>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub apis: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_mode: Option<HostModeEnv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_mode: Option<UserModeEnv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_source: Option<TokenSource>,
}

/// One server's persisted tokens.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    pub server_id: String,
    pub provider: String,
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    /// Unix timestamp (seconds) when the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl StoredTokens {
    /// Expired or expiring within `slack_secs`.
    pub fn expires_within(&self, now: u64, slack_secs: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now + slack_secs)
    }
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("server_id", &self.server_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through the token store.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_wire_shape() {
        let json = serde_json::json!({
            "provider": "google",
            "supportedSources": ["host", "user"],
            "scopes": ["gmail.modify"],
            "apis": ["gmail.googleapis.com"],
            "preferredSource": "host",
            "hostMode": {"tokenEnvVar": "GMAIL_ACCESS_TOKEN"},
        });
        let manifest: OAuthManifest = serde_json::from_value(json).unwrap();
        assert_eq!(manifest.provider, "google");
        assert_eq!(manifest.preferred_source, Some(TokenSource::Host));
        assert_eq!(
            manifest.host_mode.unwrap().token_env_var,
            "GMAIL_ACCESS_TOKEN"
        );
    }

    #[test]
    fn test_stored_tokens_debug_redacts() {
        let tokens = StoredTokens {
            server_id: "gmail".into(),
            provider: "google".into(),
            access_token: Secret::new("super-secret".into()),
            refresh_token: Some(Secret::new("refresh-secret".into())),
            expires_at: Some(1000),
            scopes: Vec::new(),
            created_at: 0,
            updated_at: 0,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_expires_within() {
        let tokens = StoredTokens {
            server_id: "s".into(),
            provider: "github".into(),
            access_token: Secret::new("t".into()),
            refresh_token: None,
            expires_at: Some(1000),
            scopes: Vec::new(),
            created_at: 0,
            updated_at: 0,
        };
        assert!(tokens.expires_within(700, 300));
        assert!(!tokens.expires_within(600, 300));
    }
}
