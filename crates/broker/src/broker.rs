//! The broker proper: grant resolution, prompting, and the enforcement
//! checks every dispatch path runs before doing work.

use std::{collections::BTreeMap, sync::Arc};

use {
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, info},
    uuid::Uuid,
};

use harbor_protocol::{GrantState, Scope};

use crate::{
    error::{BrokerError, Result},
    grants::{GrantStore, OriginGrants},
    prompt::{PermissionPrompter, PromptRequest},
    sessions::{Capabilities, Session, SessionLimits, SessionManager},
};

/// Outcome of `agent.requestPermissions`: the full per-scope map is always
/// returned, even when a denial flips `granted` to false.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionsResult {
    pub granted: bool,
    pub scopes: BTreeMap<Scope, GrantState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

pub struct PermissionBroker {
    grants: RwLock<GrantStore>,
    prompter: Arc<dyn PermissionPrompter>,
    sessions: SessionManager,
}

impl PermissionBroker {
    pub fn new(grants: GrantStore, prompter: Arc<dyn PermissionPrompter>) -> Self {
        Self {
            grants: RwLock::new(grants),
            prompter,
            sessions: SessionManager::new(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Parse raw scope strings against the closed enum, rejecting unknowns.
    pub fn normalize_scopes(raw: &[String]) -> Result<Vec<Scope>> {
        raw.iter()
            .map(|s| {
                s.parse::<Scope>()
                    .map_err(|_| BrokerError::UnknownScope(s.clone()))
            })
            .collect()
    }

    /// §4.3 request flow. Scopes already resolved for this page lifetime
    /// (granted-always, granted-once, or denied) are returned as-is; only
    /// `not-granted` scopes reach the prompt. A denial is never re-prompted.
    pub async fn request_permissions(
        &self,
        origin: &str,
        raw_scopes: &[String],
        reason: Option<String>,
        tools: Vec<String>,
    ) -> Result<PermissionsResult> {
        let scopes = Self::normalize_scopes(raw_scopes)?;

        let needing_prompt: Vec<Scope> = {
            let grants = self.grants.read().await;
            scopes
                .iter()
                .copied()
                .filter(|scope| grants.state(origin, *scope) == GrantState::NotGranted)
                .collect()
        };

        if !needing_prompt.is_empty() {
            let request = PromptRequest {
                id: Uuid::new_v4().to_string(),
                origin: origin.to_string(),
                scopes: needing_prompt.clone(),
                reason,
                tools: tools.clone(),
            };
            info!(
                origin,
                scopes = ?needing_prompt,
                prompt_id = %request.id,
                "opening permission prompt"
            );
            let decision = self.prompter.prompt(request).await?;

            let mut grants = self.grants.write().await;
            for scope in &needing_prompt {
                let state = decision
                    .scopes
                    .get(scope)
                    .copied()
                    .unwrap_or(GrantState::Denied);
                let allowed_tools = if *scope == Scope::McpToolsCall {
                    decision.allowed_tools.clone()
                } else {
                    None
                };
                grants.record(origin, *scope, state, allowed_tools)?;
            }
        } else {
            debug!(origin, "all requested scopes already resolved, no prompt");
        }

        let grants = self.grants.read().await;
        let resolved: BTreeMap<Scope, GrantState> = scopes
            .iter()
            .map(|scope| (*scope, grants.state(origin, *scope)))
            .collect();
        let granted = resolved.values().all(|state| state.allows());
        let allowed_tools = if scopes.contains(&Scope::McpToolsCall) {
            grants.allowed_tools(origin)
        } else {
            None
        };

        Ok(PermissionsResult {
            granted,
            scopes: resolved,
            allowed_tools,
        })
    }

    pub async fn permissions_list(&self, origin: &str) -> OriginGrants {
        self.grants.read().await.origin_grants(origin)
    }

    /// Content script reconnected: page-lifetime grants are consumed and
    /// implicit sessions end.
    pub async fn page_reset(&self, origin: &str) {
        self.grants.write().await.reset_page(origin);
        self.sessions.end_page(origin).await;
    }

    async fn check(&self, origin: &str, scope: Scope) -> Result<()> {
        let state = self.grants.read().await.state(origin, scope);
        if state.allows() {
            Ok(())
        } else {
            Err(BrokerError::PermissionDenied(format!(
                "{origin} lacks {scope} (state: {state:?})"
            )))
        }
    }

    pub async fn check_model(&self, origin: &str) -> Result<()> {
        self.check(origin, Scope::ModelPrompt).await
    }

    pub async fn check_model_list(&self, origin: &str) -> Result<()> {
        self.check(origin, Scope::ModelList).await
    }

    pub async fn check_tool_list(&self, origin: &str) -> Result<()> {
        self.check(origin, Scope::McpToolsList).await
    }

    /// `mcp:tools.call` state AND, when an allow-list exists, membership.
    pub async fn check_tool_call(&self, origin: &str, tool: &str) -> Result<()> {
        self.check(origin, Scope::McpToolsCall).await?;
        let grants = self.grants.read().await;
        if let Some(allowed) = grants.allowed_tools(origin) {
            if !allowed.iter().any(|t| t == tool) {
                return Err(BrokerError::PermissionDenied(format!(
                    "tool '{tool}' is not in the allow-list for {origin}"
                )));
            }
        }
        Ok(())
    }

    pub async fn check_browser(&self, origin: &str, interact: bool) -> Result<()> {
        let scope = if interact {
            Scope::BrowserActiveTabInteract
        } else {
            Scope::BrowserActiveTabRead
        };
        self.check(origin, scope).await
    }

    pub async fn check_web_fetch(&self, origin: &str) -> Result<()> {
        self.check(origin, Scope::WebFetch).await
    }

    /// Validate a capability declaration against current grants and create
    /// the session. The snapshot is immune to later revocations.
    pub async fn create_session(
        &self,
        origin: &str,
        capabilities: Capabilities,
        limits: SessionLimits,
        system_prompt: Option<String>,
        temperature: Option<f32>,
    ) -> Result<Session> {
        let grants = self.grants.read().await;

        if capabilities.llm && !grants.state(origin, Scope::ModelPrompt).allows() {
            return Err(BrokerError::InsufficientScope(Scope::ModelPrompt));
        }
        if !capabilities.tools.is_empty() {
            if !grants.state(origin, Scope::McpToolsCall).allows() {
                return Err(BrokerError::InsufficientScope(Scope::McpToolsCall));
            }
            if let Some(allowed) = grants.allowed_tools(origin) {
                for tool in &capabilities.tools {
                    if !allowed.iter().any(|t| t == tool) {
                        return Err(BrokerError::PermissionDenied(format!(
                            "declared tool '{tool}' is outside the allow-list"
                        )));
                    }
                }
            }
        }
        for capability in &capabilities.browser {
            let scope = match capability.as_str() {
                "read" => Scope::BrowserActiveTabRead,
                "interact" => Scope::BrowserActiveTabInteract,
                other => return Err(BrokerError::UnknownScope(other.to_string())),
            };
            if !grants.state(origin, scope).allows() {
                return Err(BrokerError::InsufficientScope(scope));
            }
        }
        drop(grants);

        Ok(self
            .sessions
            .create_explicit(origin, capabilities, limits, system_prompt, temperature)
            .await)
    }

    /// Full tool-call admission for a session. Explicit sessions run on the
    /// capability snapshot taken at creation (later revocations don't touch
    /// them); implicit sessions defer to the origin's current grants.
    pub async fn admit_session_tool_call(&self, session_id: &str, tool: &str) -> Result<Session> {
        let session = self.sessions.get(session_id).await?;
        if session.kind == crate::sessions::SessionKind::Implicit {
            self.check_tool_call(&session.origin, tool).await?;
        }
        self.sessions.record_tool_call(session_id, tool).await?;
        self.sessions.get(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::prompt::{DenyAllPrompter, PromptDecision},
        async_trait::async_trait,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    /// Prompter that answers every scope with a fixed state and counts calls.
    struct FixedPrompter {
        state: GrantState,
        allowed_tools: Option<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FixedPrompter {
        fn new(state: GrantState) -> Self {
            Self {
                state,
                allowed_tools: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PermissionPrompter for FixedPrompter {
        async fn prompt(&self, request: PromptRequest) -> Result<PromptDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut decision = PromptDecision::uniform(&request.scopes, self.state);
            decision.allowed_tools = self.allowed_tools.clone();
            Ok(decision)
        }
    }

    const ORIGIN: &str = "https://example.com";

    fn broker_with(prompter: Arc<dyn PermissionPrompter>) -> PermissionBroker {
        PermissionBroker::new(GrantStore::ephemeral(), prompter)
    }

    #[tokio::test]
    async fn test_unknown_scope_rejected() {
        let broker = broker_with(Arc::new(DenyAllPrompter));
        let err = broker
            .request_permissions(ORIGIN, &["model:everything".into()], None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownScope(_)));
    }

    #[tokio::test]
    async fn test_granted_once_no_reprompt_within_page() {
        let prompter = Arc::new(FixedPrompter::new(GrantState::GrantedOnce));
        let broker = broker_with(Arc::clone(&prompter) as Arc<dyn PermissionPrompter>);

        let result = broker
            .request_permissions(ORIGIN, &["mcp:tools.list".into()], None, Vec::new())
            .await
            .unwrap();
        assert!(result.granted);
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);

        // Same page lifetime: enforcement passes and no second prompt fires.
        broker.check_tool_list(ORIGIN).await.unwrap();
        let result = broker
            .request_permissions(ORIGIN, &["mcp:tools.list".into()], None, Vec::new())
            .await
            .unwrap();
        assert!(result.granted);
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);

        // Page reload: the grant was consumed, the next request prompts again.
        broker.page_reset(ORIGIN).await;
        assert!(broker.check_tool_list(ORIGIN).await.is_err());
        broker
            .request_permissions(ORIGIN, &["mcp:tools.list".into()], None, Vec::new())
            .await
            .unwrap();
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_granted_always_skips_prompt() {
        let prompter = Arc::new(FixedPrompter::new(GrantState::GrantedAlways));
        let broker = broker_with(Arc::clone(&prompter) as Arc<dyn PermissionPrompter>);

        broker
            .request_permissions(ORIGIN, &["model:prompt".into()], None, Vec::new())
            .await
            .unwrap();
        let result = broker
            .request_permissions(ORIGIN, &["model:prompt".into()], None, Vec::new())
            .await
            .unwrap();
        assert!(result.granted);
        assert_eq!(result.scopes[&Scope::ModelPrompt], GrantState::GrantedAlways);
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denial_returns_full_map_and_never_reprompts() {
        let prompter = Arc::new(FixedPrompter::new(GrantState::Denied));
        let broker = broker_with(Arc::clone(&prompter) as Arc<dyn PermissionPrompter>);

        let scopes = vec!["model:prompt".to_string(), "mcp:tools.call".to_string()];
        let result = broker
            .request_permissions(ORIGIN, &scopes, None, Vec::new())
            .await
            .unwrap();
        assert!(!result.granted);
        assert_eq!(result.scopes.len(), 2);
        assert!(result.scopes.values().all(|s| *s == GrantState::Denied));

        // Denials surface as failures on the call, never as a second prompt.
        assert!(broker.check_model(ORIGIN).await.is_err());
        broker
            .request_permissions(ORIGIN, &scopes, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_allow_list_enforced() {
        let prompter = Arc::new(FixedPrompter {
            state: GrantState::GrantedAlways,
            allowed_tools: Some(vec!["time.now".into()]),
            calls: AtomicUsize::new(0),
        });
        let broker = broker_with(prompter);

        broker
            .request_permissions(
                ORIGIN,
                &["mcp:tools.call".into()],
                None,
                vec!["time.now".into(), "fs.read".into()],
            )
            .await
            .unwrap();

        broker.check_tool_call(ORIGIN, "time.now").await.unwrap();
        let err = broker.check_tool_call(ORIGIN, "fs.read").await.unwrap_err();
        assert!(matches!(err, BrokerError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_browser_scopes_checked_independently() {
        let prompter = Arc::new(FixedPrompter::new(GrantState::GrantedAlways));
        let broker = broker_with(prompter);
        broker
            .request_permissions(ORIGIN, &["browser:activeTab.read".into()], None, Vec::new())
            .await
            .unwrap();

        broker.check_browser(ORIGIN, false).await.unwrap();
        // Interaction needs its own scope.
        assert!(broker.check_browser(ORIGIN, true).await.is_err());
    }

    #[tokio::test]
    async fn test_session_requires_grants() {
        let broker = broker_with(Arc::new(DenyAllPrompter));
        let err = broker
            .create_session(
                ORIGIN,
                Capabilities {
                    llm: true,
                    tools: Vec::new(),
                    browser: Vec::new(),
                },
                SessionLimits::default(),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::InsufficientScope(Scope::ModelPrompt)
        ));
    }

    #[tokio::test]
    async fn test_session_survives_revocation() {
        let prompter = Arc::new(FixedPrompter::new(GrantState::GrantedOnce));
        let broker = broker_with(prompter);
        broker
            .request_permissions(
                ORIGIN,
                &["model:prompt".into(), "mcp:tools.call".into()],
                None,
                Vec::new(),
            )
            .await
            .unwrap();

        let session = broker
            .create_session(
                ORIGIN,
                Capabilities {
                    llm: true,
                    tools: vec!["time.now".into()],
                    browser: Vec::new(),
                },
                SessionLimits::default(),
                None,
                None,
            )
            .await
            .unwrap();

        // The page-lifetime grants vanish, but the session snapshot stands.
        broker.page_reset(ORIGIN).await;
        let fetched = broker.sessions().get(&session.id).await.unwrap();
        assert_eq!(fetched.state, crate::sessions::SessionState::Active);
        assert!(fetched.allows_tool("time.now"));
    }
}
