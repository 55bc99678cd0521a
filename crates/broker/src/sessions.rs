//! Capability-bearing sessions.
//!
//! Implicit sessions are auto-created on an origin's first permitted call and
//! die with the tab. Explicit sessions are created by the page with a
//! declared capability set and optional limits; they self-expire via TTL or
//! tool-call quota. Permission revocations never invalidate a live session —
//! the snapshot taken at creation stands until the session ends.

use std::collections::HashMap;

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::{debug, info},
    uuid::Uuid,
};

use crate::{
    error::{BrokerError, Result},
    now_ms,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Implicit,
    Explicit,
}

/// `Terminated` is absorbing: no operation moves a session out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Suspended,
    Terminated,
}

/// Capability declaration snapshot. An empty `tools` list on an explicit
/// session means no tool access at all, not "all tools".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub llm: bool,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub browser: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub origin: String,
    pub kind: SessionKind,
    pub capabilities: Capabilities,
    pub limits: SessionLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub state: SessionState,
    pub prompt_count: u32,
    pub tool_call_count: u32,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Session {
    fn new(origin: &str, kind: SessionKind, capabilities: Capabilities, limits: SessionLimits) -> Self {
        let created_at = now_ms();
        let expires_at = limits
            .ttl_minutes
            .map(|minutes| created_at + u64::from(minutes) * 60_000);
        Self {
            id: Uuid::new_v4().to_string(),
            origin: origin.to_string(),
            kind,
            capabilities,
            limits,
            system_prompt: None,
            temperature: None,
            state: SessionState::Active,
            prompt_count: 0,
            tool_call_count: 0,
            created_at,
            expires_at,
        }
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        match self.kind {
            // Implicit sessions defer entirely to the origin's grants.
            SessionKind::Implicit => true,
            SessionKind::Explicit => self.capabilities.tools.iter().any(|t| t == tool),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Owns every live session. Sessions never persist across helper runs.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an explicit session. Grant validation happens in the broker
    /// before this is called.
    pub async fn create_explicit(
        &self,
        origin: &str,
        capabilities: Capabilities,
        limits: SessionLimits,
        system_prompt: Option<String>,
        temperature: Option<f32>,
    ) -> Session {
        let mut session = Session::new(origin, SessionKind::Explicit, capabilities, limits);
        session.system_prompt = system_prompt;
        session.temperature = temperature;
        info!(id = %session.id, origin, "created explicit session");
        let snapshot = session.clone();
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        snapshot
    }

    /// Find the origin's live implicit session, creating one on first use.
    pub async fn implicit_for(&self, origin: &str) -> Session {
        let mut sessions = self.sessions.write().await;
        let now = now_ms();
        if let Some(existing) = sessions.values().find(|s| {
            s.origin == origin
                && s.kind == SessionKind::Implicit
                && s.state == SessionState::Active
                && !s.is_expired(now)
        }) {
            return existing.clone();
        }
        let session = Session::new(
            origin,
            SessionKind::Implicit,
            Capabilities::default(),
            SessionLimits::default(),
        );
        debug!(id = %session.id, origin, "created implicit session");
        let snapshot = session.clone();
        sessions.insert(session.id.clone(), session);
        snapshot
    }

    /// Fetch a session, applying TTL expiry as a terminal transition.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        if session.state != SessionState::Terminated && session.is_expired(now_ms()) {
            debug!(id, "session TTL elapsed");
            session.state = SessionState::Terminated;
        }
        Ok(session.clone())
    }

    pub async fn list(&self, origin: &str) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.origin == origin)
            .cloned()
            .collect()
    }

    /// Idempotent: terminating a terminated session succeeds.
    pub async fn terminate(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        if session.state != SessionState::Terminated {
            info!(id, "terminating session");
            session.state = SessionState::Terminated;
        }
        Ok(())
    }

    pub async fn suspend(&self, id: &str) -> Result<()> {
        self.transition(id, SessionState::Suspended).await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        self.transition(id, SessionState::Active).await
    }

    async fn transition(&self, id: &str, to: SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        if session.state == SessionState::Terminated {
            return Err(BrokerError::SessionTerminated(id.to_string()));
        }
        session.state = to;
        Ok(())
    }

    /// Count a prompt against the session. Rejected unless active.
    pub async fn record_prompt(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        ensure_active(session)?;
        session.prompt_count += 1;
        Ok(())
    }

    /// Admit one tool call against the session's declared capabilities and
    /// quota. Exhausting `max_tool_calls` terminates the session; the call
    /// that trips the quota is rejected.
    pub async fn record_tool_call(&self, id: &str, tool: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        ensure_active(session)?;

        if !session.allows_tool(tool) {
            return Err(BrokerError::PermissionDenied(format!(
                "session {id} does not declare tool '{tool}'"
            )));
        }

        if let Some(max) = session.limits.max_tool_calls {
            if session.tool_call_count >= max {
                info!(id, max, "tool-call quota exhausted, terminating session");
                session.state = SessionState::Terminated;
                return Err(BrokerError::QuotaExceeded(id.to_string()));
            }
        }

        session.tool_call_count += 1;
        Ok(())
    }

    /// Tab closed or page reloaded: implicit sessions for the origin end.
    pub async fn end_page(&self, origin: &str) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values_mut() {
            if session.origin == origin && session.kind == SessionKind::Implicit {
                session.state = SessionState::Terminated;
            }
        }
    }
}

fn ensure_active(session: &mut Session) -> Result<()> {
    if session.state != SessionState::Terminated && session.is_expired(now_ms()) {
        session.state = SessionState::Terminated;
    }
    match session.state {
        SessionState::Active => Ok(()),
        SessionState::Suspended => Err(BrokerError::PermissionDenied(format!(
            "session {} is suspended",
            session.id
        ))),
        SessionState::Terminated => Err(BrokerError::SessionTerminated(session.id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tools: &[&str]) -> Capabilities {
        Capabilities {
            llm: true,
            tools: tools.iter().map(|s| s.to_string()).collect(),
            browser: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_quota_terminates_and_rejects() {
        let mgr = SessionManager::new();
        let session = mgr
            .create_explicit(
                "https://example.com",
                caps(&["time.now"]),
                SessionLimits {
                    max_tool_calls: Some(2),
                    ttl_minutes: None,
                },
                None,
                None,
            )
            .await;

        mgr.record_tool_call(&session.id, "time.now").await.unwrap();
        mgr.record_tool_call(&session.id, "time.now").await.unwrap();

        let err = mgr
            .record_tool_call(&session.id, "time.now")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QuotaExceeded(_)));

        let session = mgr.get(&session.id).await.unwrap();
        assert_eq!(session.state, SessionState::Terminated);
        assert_eq!(session.tool_call_count, 2);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mgr = SessionManager::new();
        let session = mgr
            .create_explicit(
                "https://example.com",
                caps(&[]),
                SessionLimits::default(),
                None,
                None,
            )
            .await;
        mgr.terminate(&session.id).await.unwrap();
        mgr.terminate(&session.id).await.unwrap();
        assert_eq!(
            mgr.get(&session.id).await.unwrap().state,
            SessionState::Terminated
        );
    }

    #[tokio::test]
    async fn test_undeclared_tool_rejected() {
        let mgr = SessionManager::new();
        let session = mgr
            .create_explicit(
                "https://example.com",
                caps(&["fs.read"]),
                SessionLimits::default(),
                None,
                None,
            )
            .await;
        let err = mgr
            .record_tool_call(&session.id, "fs.write")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_terminated_rejects_operations() {
        let mgr = SessionManager::new();
        let session = mgr
            .create_explicit(
                "https://example.com",
                caps(&["time.now"]),
                SessionLimits::default(),
                None,
                None,
            )
            .await;
        mgr.terminate(&session.id).await.unwrap();
        assert!(matches!(
            mgr.record_prompt(&session.id).await.unwrap_err(),
            BrokerError::SessionTerminated(_)
        ));
        assert!(matches!(
            mgr.record_tool_call(&session.id, "time.now").await.unwrap_err(),
            BrokerError::SessionTerminated(_)
        ));
    }

    #[tokio::test]
    async fn test_implicit_reused_per_origin() {
        let mgr = SessionManager::new();
        let first = mgr.implicit_for("https://example.com").await;
        let second = mgr.implicit_for("https://example.com").await;
        assert_eq!(first.id, second.id);

        let other = mgr.implicit_for("https://other.test").await;
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_end_page_terminates_implicit_only() {
        let mgr = SessionManager::new();
        let implicit = mgr.implicit_for("https://example.com").await;
        let explicit = mgr
            .create_explicit(
                "https://example.com",
                caps(&[]),
                SessionLimits::default(),
                None,
                None,
            )
            .await;

        mgr.end_page("https://example.com").await;

        assert_eq!(
            mgr.get(&implicit.id).await.unwrap().state,
            SessionState::Terminated
        );
        assert_eq!(
            mgr.get(&explicit.id).await.unwrap().state,
            SessionState::Active
        );
    }

    #[tokio::test]
    async fn test_counters_monotone() {
        let mgr = SessionManager::new();
        let session = mgr
            .create_explicit(
                "https://example.com",
                caps(&["a"]),
                SessionLimits::default(),
                None,
                None,
            )
            .await;
        mgr.record_prompt(&session.id).await.unwrap();
        mgr.record_prompt(&session.id).await.unwrap();
        mgr.record_tool_call(&session.id, "a").await.unwrap();
        let s = mgr.get(&session.id).await.unwrap();
        assert_eq!(s.prompt_count, 2);
        assert_eq!(s.tool_call_count, 1);
    }
}
