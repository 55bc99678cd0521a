//! The broker ties source selection, the flow, the callback listener, and the
//! token store together, and owns the refresh policy.
//!
//! Refresh happens two ways: the bridge runs a periodic sweep
//! ([`OAuthBroker::refresh_expiring`]) that renews anything inside the 5-minute
//! window, and every token read ([`OAuthBroker::access_token`]) refreshes
//! lazily when the sweep hasn't gotten there yet. Tokens are evicted only
//! after two consecutive refresh failures past the stored expiry.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    callback_server::CallbackServer,
    capabilities::{HostCapabilities, check_capabilities},
    error::{Error, Result},
    flow::{FlowConfig, OAuthFlow},
    now_secs,
    providers::{CALLBACK_PORT, provider_endpoints, redirect_uri},
    store::TokenStore,
    types::{OAuthManifest, StoredTokens, TokenSource},
};

/// Tokens inside this window are treated as expiring.
const REFRESH_WINDOW_SECS: u64 = 300;
/// Consecutive post-expiry refresh failures before eviction.
const EVICTION_FAILURES: u32 = 2;

pub struct OAuthBroker {
    store: TokenStore,
    capabilities: HostCapabilities,
    /// Test hook: (auth_url, token_url) per provider.
    endpoint_overrides: HashMap<String, (String, String)>,
    failures: Mutex<HashMap<String, u32>>,
}

impl OAuthBroker {
    pub fn new(store: TokenStore, capabilities: HostCapabilities) -> Self {
        Self {
            store,
            capabilities,
            endpoint_overrides: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Redirect a provider's endpoints (tests point this at a local server).
    pub fn override_endpoints(&mut self, provider: &str, auth_url: String, token_url: String) {
        self.endpoint_overrides
            .insert(provider.to_string(), (auth_url, token_url));
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// §4.7 source selection.
    pub fn check_oauth_capabilities(&self, manifest: &OAuthManifest) -> Result<TokenSource> {
        check_capabilities(manifest, &self.capabilities)
    }

    fn flow_config(&self, provider: &str, scopes: &[String]) -> Result<FlowConfig> {
        let endpoints = provider_endpoints(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;
        let caps = self
            .capabilities
            .providers
            .get(provider)
            .ok_or_else(|| Error::Unhandleable {
                provider: provider.to_string(),
                reason: "provider has no host credentials configured".into(),
            })?;

        let (auth_url, token_url) = match self.endpoint_overrides.get(provider) {
            Some((auth, token)) => (auth.clone(), token.clone()),
            None => (endpoints.auth_url.to_string(), endpoints.token_url.to_string()),
        };

        let scopes = if scopes.is_empty() {
            endpoints.default_scopes.iter().map(ToString::to_string).collect()
        } else {
            scopes.to_vec()
        };

        Ok(FlowConfig {
            auth_url,
            token_url,
            client_id: caps.client_id.clone(),
            client_secret: if endpoints.public_client {
                None
            } else {
                caps.client_secret.clone()
            },
            redirect_uri: redirect_uri(),
            scopes,
        })
    }

    /// Run the full `host`-mode flow for a server: build the authorization
    /// URL, hand it to `open_url` (the bridge sends it to the extension to
    /// open a tab), await the loopback callback, exchange, persist.
    pub async fn authorize<F>(
        &self,
        server_id: &str,
        manifest: &OAuthManifest,
        open_url: F,
    ) -> Result<()>
    where
        F: FnOnce(&str),
    {
        let source = self.check_oauth_capabilities(manifest)?;
        if source != TokenSource::Host {
            debug!(server = %server_id, ?source, "no host flow needed");
            return Ok(());
        }

        let flow = OAuthFlow::new(self.flow_config(&manifest.provider, &manifest.scopes)?);
        let request = flow.start()?;
        info!(server = %server_id, provider = %manifest.provider, "starting OAuth flow");
        open_url(&request.url);

        let code = CallbackServer::wait_for_code(CALLBACK_PORT, request.state).await?;
        let response = flow.exchange(&code, &request.pkce.verifier).await?;

        let now = now_secs();
        self.store
            .upsert(StoredTokens {
                server_id: server_id.to_string(),
                provider: manifest.provider.clone(),
                access_token: Secret::new(response.access_token),
                refresh_token: response.refresh_token.map(Secret::new),
                expires_at: response.expires_at,
                scopes: if response.scopes.is_empty() {
                    manifest.scopes.clone()
                } else {
                    response.scopes
                },
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.failures.lock().await.remove(server_id);
        Ok(())
    }

    /// Current access token for a server, refreshing lazily when it is inside
    /// the 5-minute window.
    pub async fn access_token(&self, server_id: &str) -> Result<Secret<String>> {
        let stored = self
            .store
            .get(server_id)
            .await
            .ok_or_else(|| Error::NoTokens(server_id.to_string()))?;

        let now = now_secs();
        if !stored.expires_within(now, REFRESH_WINDOW_SECS) {
            return Ok(stored.access_token);
        }

        match self.refresh_stored(&stored).await {
            Ok(renewed) => Ok(renewed.access_token),
            Err(e) => {
                let hard_expired = stored.expires_at.is_some_and(|at| now >= at);
                let count = {
                    let mut failures = self.failures.lock().await;
                    let count = failures.entry(server_id.to_string()).or_insert(0);
                    if hard_expired {
                        *count += 1;
                    }
                    *count
                };
                warn!(server = %server_id, error = %e, failures = count, "token refresh failed");

                if hard_expired {
                    if count >= EVICTION_FAILURES {
                        info!(server = %server_id, "evicting tokens after repeated refresh failures");
                        self.store.delete(server_id).await?;
                        self.failures.lock().await.remove(server_id);
                    }
                    return Err(e);
                }
                // Still valid for a few minutes; serve the stored token.
                Ok(stored.access_token)
            },
        }
    }

    async fn refresh_stored(&self, stored: &StoredTokens) -> Result<StoredTokens> {
        let refresh_token = stored
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::message("no refresh token stored"))?;

        let flow = OAuthFlow::new(self.flow_config(&stored.provider, &stored.scopes)?);
        let response = flow.refresh(refresh_token.expose_secret()).await?;

        let renewed = StoredTokens {
            server_id: stored.server_id.clone(),
            provider: stored.provider.clone(),
            access_token: Secret::new(response.access_token),
            // Rotated only when the provider sent a new one.
            refresh_token: response
                .refresh_token
                .map(Secret::new)
                .or_else(|| stored.refresh_token.clone()),
            expires_at: response.expires_at,
            scopes: stored.scopes.clone(),
            created_at: stored.created_at,
            updated_at: now_secs(),
        };
        self.store.upsert(renewed.clone()).await?;
        self.failures.lock().await.remove(&stored.server_id);
        debug!(server = %stored.server_id, "access token refreshed");
        Ok(renewed)
    }

    /// One proactive sweep: refresh every stored token inside the window.
    /// The bridge calls this on an interval timer.
    pub async fn refresh_expiring(&self) {
        let now = now_secs();
        for stored in self.store.list().await {
            if stored.expires_within(now, REFRESH_WINDOW_SECS) && stored.refresh_token.is_some() {
                if let Err(e) = self.refresh_stored(&stored).await {
                    warn!(server = %stored.server_id, error = %e, "proactive refresh failed");
                }
            }
        }
    }

    /// Env vars to inject when launching a server, exactly as the manifest
    /// declares them.
    pub async fn env_vars_for_server(
        &self,
        server_id: &str,
        manifest: &OAuthManifest,
    ) -> Result<HashMap<String, String>> {
        let source = self.check_oauth_capabilities(manifest)?;
        let mut env = HashMap::new();

        match source {
            TokenSource::Host => {
                let Some(host_mode) = &manifest.host_mode else {
                    return Err(Error::message(format!(
                        "manifest for '{server_id}' selects host mode but declares no hostMode env"
                    )));
                };
                let stored = self
                    .store
                    .get(server_id)
                    .await
                    .ok_or_else(|| Error::NoTokens(server_id.to_string()))?;
                let access = self.access_token(server_id).await?;

                env.insert(
                    host_mode.token_env_var.clone(),
                    access.expose_secret().clone(),
                );
                if let (Some(var), Some(refresh)) =
                    (&host_mode.refresh_token_env_var, &stored.refresh_token)
                {
                    env.insert(var.clone(), refresh.expose_secret().clone());
                }
                if let Some(caps) = self.capabilities.providers.get(&manifest.provider) {
                    if let Some(var) = &host_mode.client_id_env_var {
                        env.insert(var.clone(), caps.client_id.clone());
                    }
                    if let (Some(var), Some(secret)) =
                        (&host_mode.client_secret_env_var, &caps.client_secret)
                    {
                        env.insert(var.clone(), secret.clone());
                    }
                }
            },
            TokenSource::User => {
                if let Some(user_mode) = &manifest.user_mode {
                    for (var, path) in &user_mode.credential_env_vars {
                        env.insert(var.clone(), path.clone());
                    }
                }
            },
            TokenSource::Server => {},
        }

        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::capabilities::ProviderCapabilities,
        crate::types::HostModeEnv,
    };

    fn gmail_manifest() -> OAuthManifest {
        OAuthManifest {
            provider: "google".into(),
            supported_sources: vec![TokenSource::Host, TokenSource::User],
            scopes: vec!["gmail.modify".into(), "gmail.settings.basic".into()],
            apis: vec!["gmail.googleapis.com".into()],
            host_mode: Some(HostModeEnv {
                token_env_var: "GMAIL_ACCESS_TOKEN".into(),
                refresh_token_env_var: Some("GMAIL_REFRESH_TOKEN".into()),
                client_id_env_var: Some("GMAIL_CLIENT_ID".into()),
                client_secret_env_var: Some("GMAIL_CLIENT_SECRET".into()),
            }),
            user_mode: None,
            preferred_source: Some(TokenSource::Host),
        }
    }

    fn google_caps() -> HostCapabilities {
        let mut caps = HostCapabilities::default();
        caps.providers.insert("google".into(), ProviderCapabilities {
            client_id: "harbor-client-id".into(),
            client_secret: Some("harbor-client-secret".into()),
            available_scopes: ["gmail.modify", "gmail.settings.basic"]
                .into_iter()
                .map(String::from)
                .collect(),
            enabled_apis: ["gmail.googleapis.com"]
                .into_iter()
                .map(String::from)
                .collect(),
        });
        caps
    }

    fn broker_in(dir: &std::path::Path) -> OAuthBroker {
        OAuthBroker::new(
            TokenStore::new(dir.join("oauth-tokens.json")),
            google_caps(),
        )
    }

    async fn seed(broker: &OAuthBroker, server_id: &str, expires_at: Option<u64>) {
        broker
            .store
            .upsert(StoredTokens {
                server_id: server_id.into(),
                provider: "google".into(),
                access_token: Secret::new("the-access-token".into()),
                refresh_token: Some(Secret::new("the-refresh-token".into())),
                expires_at,
                scopes: vec!["gmail.modify".into()],
                created_at: now_secs(),
                updated_at: now_secs(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_source_selection_host() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker_in(dir.path());
        assert_eq!(
            broker.check_oauth_capabilities(&gmail_manifest()).unwrap(),
            TokenSource::Host
        );
    }

    #[tokio::test]
    async fn test_env_vars_for_host_mode() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker_in(dir.path());
        let far_future = now_secs() + 86_400;
        seed(&broker, "gmail-server", Some(far_future)).await;

        let env = broker
            .env_vars_for_server("gmail-server", &gmail_manifest())
            .await
            .unwrap();

        assert_eq!(env["GMAIL_ACCESS_TOKEN"], "the-access-token");
        assert_eq!(env["GMAIL_REFRESH_TOKEN"], "the-refresh-token");
        assert_eq!(env["GMAIL_CLIENT_ID"], "harbor-client-id");
        assert_eq!(env["GMAIL_CLIENT_SECRET"], "harbor-client-secret");
        assert_eq!(env.len(), 4);
    }

    #[tokio::test]
    async fn test_env_vars_for_user_mode() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker_in(dir.path());

        let mut manifest = gmail_manifest();
        manifest.preferred_source = Some(TokenSource::User);
        manifest.user_mode = Some(crate::types::UserModeEnv {
            credential_env_vars: [("GOOGLE_APPLICATION_CREDENTIALS".to_string(),
                "/home/user/creds.json".to_string())]
            .into_iter()
            .collect(),
        });

        let env = broker
            .env_vars_for_server("gmail-server", &manifest)
            .await
            .unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(
            env["GOOGLE_APPLICATION_CREDENTIALS"],
            "/home/user/creds.json"
        );
    }

    #[tokio::test]
    async fn test_fresh_token_served_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker_in(dir.path());
        seed(&broker, "s", Some(now_secs() + 86_400)).await;

        let token = broker.access_token("s").await.unwrap();
        assert_eq!(token.expose_secret(), "the-access-token");
    }

    #[tokio::test]
    async fn test_expiring_token_refreshes_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = broker_in(dir.path());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"renewed","expires_in":3600}"#)
            .create_async()
            .await;
        broker.override_endpoints(
            "google",
            format!("{}/auth", server.url()),
            format!("{}/token", server.url()),
        );

        // Inside the 5-minute window.
        seed(&broker, "s", Some(now_secs() + 60)).await;

        let token = broker.access_token("s").await.unwrap();
        assert_eq!(token.expose_secret(), "renewed");

        // Refresh token was not rotated: the old one is still stored.
        let stored = broker.store.get("s").await.unwrap();
        assert_eq!(
            stored.refresh_token.unwrap().expose_secret(),
            "the-refresh-token"
        );
    }

    #[tokio::test]
    async fn test_eviction_after_two_post_expiry_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = broker_in(dir.path());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(500)
            .expect_at_least(2)
            .create_async()
            .await;
        broker.override_endpoints(
            "google",
            format!("{}/auth", server.url()),
            format!("{}/token", server.url()),
        );

        // Already past expiry.
        seed(&broker, "s", Some(now_secs() - 10)).await;

        assert!(broker.access_token("s").await.is_err());
        assert!(broker.store.get("s").await.is_some(), "one failure keeps tokens");

        assert!(broker.access_token("s").await.is_err());
        assert!(
            broker.store.get("s").await.is_none(),
            "second consecutive failure evicts"
        );
    }

    #[tokio::test]
    async fn test_failure_before_expiry_serves_stored_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut broker = broker_in(dir.path());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(500)
            .create_async()
            .await;
        broker.override_endpoints(
            "google",
            format!("{}/auth", server.url()),
            format!("{}/token", server.url()),
        );

        // In the window but not yet expired.
        seed(&broker, "s", Some(now_secs() + 120)).await;

        let token = broker.access_token("s").await.unwrap();
        assert_eq!(token.expose_secret(), "the-access-token");
        assert!(broker.store.get("s").await.is_some());
    }
}
