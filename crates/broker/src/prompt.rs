//! Permission prompt plumbing.
//!
//! The prompt window itself is UI and lives outside this crate. The broker
//! talks to it through [`PermissionPrompter`]; the bridge's implementation
//! pushes a request to the extension and parks on [`PendingPrompts`] until a
//! decision frame arrives.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::{Mutex, oneshot},
    tracing::{debug, warn},
};

use harbor_protocol::{GrantState, Scope};

use crate::error::{BrokerError, Result};

/// How long a prompt can sit unanswered before it resolves as denied.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// What the prompt window is asked to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub id: String,
    pub origin: String,
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Tool names offered for the allow-list when `mcp:tools.call` is asked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

/// The user's decision, per scope, plus the tool allow-list if one applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDecision {
    pub scopes: HashMap<Scope, GrantState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

impl PromptDecision {
    /// One state applied to every requested scope.
    pub fn uniform(scopes: &[Scope], state: GrantState) -> Self {
        Self {
            scopes: scopes.iter().map(|s| (*s, state)).collect(),
            allowed_tools: None,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }
}

/// Asks the user to decide on a set of scopes for an origin.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptDecision>;
}

/// Prompter that denies everything. Forked run modes never prompt.
pub struct DenyAllPrompter;

#[async_trait]
impl PermissionPrompter for DenyAllPrompter {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptDecision> {
        Ok(PromptDecision::uniform(&request.scopes, GrantState::Denied))
    }
}

/// Registry of prompts awaiting a decision frame from the extension.
#[derive(Default)]
pub struct PendingPrompts {
    waiting: Mutex<HashMap<String, oneshot::Sender<PromptDecision>>>,
}

impl PendingPrompts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Park a prompt. The returned receiver resolves when [`resolve`] is
    /// called with the same id.
    ///
    /// [`resolve`]: PendingPrompts::resolve
    pub async fn register(&self, id: &str) -> oneshot::Receiver<PromptDecision> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(id.to_string(), tx);
        rx
    }

    /// Deliver a decision for a parked prompt. Unknown ids are ignored (the
    /// prompt may have timed out already).
    pub async fn resolve(&self, id: &str, decision: PromptDecision) {
        match self.waiting.lock().await.remove(id) {
            Some(tx) => {
                let _ = tx.send(decision);
            },
            None => warn!(id, "decision for unknown or expired prompt"),
        }
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.waiting.lock().await.keys().cloned().collect()
    }

    /// Await a registered prompt with the standard timeout. A timeout
    /// resolves as a denial of every requested scope.
    pub async fn wait(
        &self,
        request: &PromptRequest,
        rx: oneshot::Receiver<PromptDecision>,
    ) -> Result<PromptDecision> {
        match tokio::time::timeout(PROMPT_TIMEOUT, rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Err(BrokerError::PromptFailed(
                "prompt channel dropped before a decision".into(),
            )),
            Err(_) => {
                debug!(id = %request.id, origin = %request.origin, "prompt timed out, denying");
                self.waiting.lock().await.remove(&request.id);
                Ok(PromptDecision::uniform(&request.scopes, GrantState::Denied))
            },
        }
    }
}
