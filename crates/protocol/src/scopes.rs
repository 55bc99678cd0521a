//! Permission scopes and grant states.
//!
//! The scope set is closed: adding one is a protocol change that touches the
//! prompt UI contract and every broker enforcement point together. Unknown
//! scope strings are rejected at the boundary, never passed through.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Scope {
    #[serde(rename = "model:prompt")]
    ModelPrompt,
    #[serde(rename = "model:list")]
    ModelList,
    #[serde(rename = "model:tools")]
    ModelTools,
    #[serde(rename = "mcp:tools.list")]
    McpToolsList,
    #[serde(rename = "mcp:tools.call")]
    McpToolsCall,
    #[serde(rename = "browser:activeTab.read")]
    BrowserActiveTabRead,
    #[serde(rename = "browser:activeTab.interact")]
    BrowserActiveTabInteract,
    #[serde(rename = "web:fetch")]
    WebFetch,
}

impl Scope {
    pub const ALL: [Scope; 8] = [
        Scope::ModelPrompt,
        Scope::ModelList,
        Scope::ModelTools,
        Scope::McpToolsList,
        Scope::McpToolsCall,
        Scope::BrowserActiveTabRead,
        Scope::BrowserActiveTabInteract,
        Scope::WebFetch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::ModelPrompt => "model:prompt",
            Scope::ModelList => "model:list",
            Scope::ModelTools => "model:tools",
            Scope::McpToolsList => "mcp:tools.list",
            Scope::McpToolsCall => "mcp:tools.call",
            Scope::BrowserActiveTabRead => "browser:activeTab.read",
            Scope::BrowserActiveTabInteract => "browser:activeTab.interact",
            Scope::WebFetch => "web:fetch",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| UnknownScope(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission scope: {0}")]
pub struct UnknownScope(pub String);

/// State of a grant for one (origin, scope) pair.
///
/// `granted-once` is consumed on first use within the page lifetime;
/// `granted-always` persists across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GrantState {
    GrantedOnce,
    GrantedAlways,
    Denied,
    #[default]
    NotGranted,
}

impl GrantState {
    /// Whether this state currently authorizes a call.
    pub fn allows(&self) -> bool {
        matches!(self, GrantState::GrantedOnce | GrantState::GrantedAlways)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    #[test]
    fn test_scope_wire_spellings() {
        for scope in Scope::ALL {
            let json = serde_json::to_string(&scope).unwrap();
            assert_eq!(json, format!("\"{}\"", scope.as_str()));
            let parsed: Scope = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, scope);
        }
    }

    #[test]
    fn test_scope_from_str_rejects_unknown() {
        assert!(Scope::from_str("model:prompt").is_ok());
        assert!(Scope::from_str("model:everything").is_err());
        assert!(Scope::from_str("").is_err());
    }

    #[test]
    fn test_grant_state_spellings() {
        assert_eq!(
            serde_json::to_string(&GrantState::GrantedOnce).unwrap(),
            "\"granted-once\""
        );
        assert_eq!(
            serde_json::to_string(&GrantState::NotGranted).unwrap(),
            "\"not-granted\""
        );
    }

    #[test]
    fn test_grant_state_allows() {
        assert!(GrantState::GrantedOnce.allows());
        assert!(GrantState::GrantedAlways.allows());
        assert!(!GrantState::Denied.allows());
        assert!(!GrantState::NotGranted.allows());
    }
}
