//! Grant storage: persisted `granted-always` decisions plus the in-memory
//! table of `granted-once` and per-page denials.
//!
//! Only `granted-always` grants (and their tool allow-lists) touch disk.
//! Everything else is scoped to the current page lifetime and cleared by
//! [`GrantStore::reset_page`] when the origin's content script reconnects.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use harbor_protocol::{GrantState, Scope};

use crate::{error::Result, now_ms};

/// A persisted `granted-always` decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    pub granted_at: u64,
}

/// Everything the broker knows about one origin, resolved.
#[derive(Debug, Clone, Serialize)]
pub struct OriginGrants {
    pub origin: String,
    pub scopes: HashMap<Scope, GrantState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GrantFile {
    #[serde(default)]
    origins: HashMap<String, HashMap<Scope, PersistedGrant>>,
}

/// Single-writer grant table. Readers receive resolved snapshots.
pub struct GrantStore {
    path: Option<PathBuf>,
    persisted: GrantFile,
    /// (origin → scope → state) for the current page lifetime only.
    transient: HashMap<String, HashMap<Scope, GrantState>>,
}

impl GrantStore {
    /// In-memory store, nothing persisted. Used by tests and the forked run
    /// modes that never prompt.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            persisted: GrantFile::default(),
            transient: HashMap::new(),
        }
    }

    /// Load from `permissions.json`, starting empty when absent. A corrupt
    /// file loses its grants rather than blocking startup — the user gets
    /// re-prompted, which is the safe direction.
    pub fn load(path: &Path) -> Result<Self> {
        let persisted = match harbor_common::read_json(path) {
            Ok(file) => file.unwrap_or_default(),
            Err(harbor_common::StoreError::Corrupt { .. }) => {
                debug!(path = %path.display(), "grant file corrupt, starting fresh");
                GrantFile::default()
            },
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            persisted,
            transient: HashMap::new(),
        })
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        harbor_common::write_json_private(path, &self.persisted)?;
        Ok(())
    }

    /// Resolved state for one (origin, scope): persisted `granted-always`
    /// wins, then the page-lifetime table, then `not-granted`.
    pub fn state(&self, origin: &str, scope: Scope) -> GrantState {
        if self
            .persisted
            .origins
            .get(origin)
            .is_some_and(|scopes| scopes.contains_key(&scope))
        {
            return GrantState::GrantedAlways;
        }
        self.transient
            .get(origin)
            .and_then(|scopes| scopes.get(&scope))
            .copied()
            .unwrap_or_default()
    }

    /// Tool allow-list attached to a persisted `mcp:tools.call` grant.
    pub fn allowed_tools(&self, origin: &str) -> Option<Vec<String>> {
        self.persisted
            .origins
            .get(origin)
            .and_then(|scopes| scopes.get(&Scope::McpToolsCall))
            .and_then(|grant| grant.allowed_tools.clone())
    }

    /// Record a prompt decision for one scope.
    pub fn record(
        &mut self,
        origin: &str,
        scope: Scope,
        state: GrantState,
        allowed_tools: Option<Vec<String>>,
    ) -> Result<()> {
        match state {
            GrantState::GrantedAlways => {
                info!(origin, scope = %scope, "persisting granted-always");
                self.persisted
                    .origins
                    .entry(origin.to_string())
                    .or_default()
                    .insert(scope, PersistedGrant {
                        allowed_tools,
                        granted_at: now_ms(),
                    });
                // A persisted grant supersedes any page-lifetime state.
                if let Some(scopes) = self.transient.get_mut(origin) {
                    scopes.remove(&scope);
                }
                self.save()?;
            },
            GrantState::GrantedOnce | GrantState::Denied => {
                debug!(origin, scope = %scope, state = ?state, "recording page-lifetime grant");
                self.transient
                    .entry(origin.to_string())
                    .or_default()
                    .insert(scope, state);
            },
            GrantState::NotGranted => {},
        }
        Ok(())
    }

    /// Revoke a persisted grant.
    pub fn revoke(&mut self, origin: &str, scope: Scope) -> Result<bool> {
        let removed = self
            .persisted
            .origins
            .get_mut(origin)
            .is_some_and(|scopes| scopes.remove(&scope).is_some());
        if removed {
            info!(origin, scope = %scope, "revoked grant");
            self.save()?;
        }
        Ok(removed)
    }

    /// Drop page-lifetime state for an origin. `granted-once` grants are
    /// consumed here: a reloaded page starts from `not-granted`.
    pub fn reset_page(&mut self, origin: &str) {
        if self.transient.remove(origin).is_some() {
            debug!(origin, "cleared page-lifetime grants");
        }
    }

    /// Resolved snapshot of every scope for an origin.
    pub fn origin_grants(&self, origin: &str) -> OriginGrants {
        let scopes = Scope::ALL
            .into_iter()
            .map(|scope| (scope, self.state(origin, scope)))
            .collect();
        OriginGrants {
            origin: origin.to_string(),
            scopes,
            allowed_tools: self.allowed_tools(origin),
        }
    }
}
