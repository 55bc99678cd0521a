//! The OAuth 2.0 authorization-code flow with PKCE.

use url::Url;

use crate::{
    error::{Error, Result},
    pkce::{generate_pkce, generate_state},
    types::PkceChallenge,
};

/// Subtracted from `expires_in` so a token is never presented right at the
/// edge of its lifetime.
const EXPIRY_SLACK_SECS: u64 = 30;

/// Endpoint configuration for one flow run.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    /// Confidential clients send the secret at the token endpoint; public
    /// clients rely on PKCE alone.
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Result of starting the flow: send the user to `url`, keep the verifier and
/// state for the callback.
pub struct AuthorizationRequest {
    pub url: String,
    pub pkce: PkceChallenge,
    pub state: String,
}

/// Raw token endpoint response, normalized.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds), slack already applied.
    pub expires_at: Option<u64>,
    pub scopes: Vec<String>,
}

pub struct OAuthFlow {
    config: FlowConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build the authorization URL and generate PKCE + state.
    pub fn start(&self) -> Result<AuthorizationRequest> {
        let pkce = generate_pkce();
        let state = generate_state();

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| Error::message(format!("invalid auth_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &state);

        if !self.config.scopes.is_empty() {
            url.query_pairs_mut()
                .append_pair("scope", &self.config.scopes.join(" "));
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            pkce,
            state,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("code_verifier".to_string(), verifier.to_string()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }

        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        parse_token_response(&resp)
    }

    /// Refresh an access token. The refresh token itself is only replaced
    /// when the provider returns a new one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }

        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        parse_token_response(&resp)
    }
}

fn parse_token_response(resp: &serde_json::Value) -> Result<TokenResponse> {
    let access_token = resp["access_token"]
        .as_str()
        .ok_or_else(|| Error::message("missing access_token in token response"))?
        .to_string();

    let refresh_token = resp["refresh_token"].as_str().map(ToString::to_string);

    let expires_at = resp["expires_in"].as_u64().map(|secs| {
        crate::now_secs() + secs.saturating_sub(EXPIRY_SLACK_SECS)
    });

    let scopes = resp["scope"]
        .as_str()
        .map(|s| s.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default();

    Ok(TokenResponse {
        access_token,
        refresh_token,
        expires_at,
        scopes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_for(token_url: &str) -> OAuthFlow {
        OAuthFlow::new(FlowConfig {
            auth_url: "https://auth.example/authorize".into(),
            token_url: token_url.into(),
            client_id: "cid".into(),
            client_secret: Some("sec".into()),
            redirect_uri: "http://127.0.0.1:8976/auth/callback".into(),
            scopes: vec!["a".into(), "b".into()],
        })
    }

    #[test]
    fn test_authorization_url_parameters() {
        let flow = flow_for("https://auth.example/token");
        let req = flow.start().unwrap();
        let url = Url::parse(&req.url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], req.pkce.challenge);
        assert_eq!(pairs["state"], req.state);
        assert_eq!(pairs["scope"], "a b");
    }

    #[tokio::test]
    async fn test_exchange_parses_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600,"scope":"a b"}"#,
            )
            .create_async()
            .await;

        let flow = flow_for(&format!("{}/token", server.url()));
        let tokens = flow.exchange("the-code", "the-verifier").await.unwrap();

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert!(tokens.expires_at.is_some());
        assert_eq!(tokens.scopes, vec!["a", "b"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
            .create_async()
            .await;

        let flow = flow_for(&format!("{}/token", server.url()));
        let tokens = flow.refresh("rt-old").await.unwrap();
        assert_eq!(tokens.access_token, "at-2");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_exchange_error_status_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let flow = flow_for(&format!("{}/token", server.url()));
        assert!(flow.exchange("bad", "v").await.is_err());
    }
}
