//! Permission and session broker.
//!
//! Every tool, model, or browser operation consults the broker synchronously
//! before dispatch. Policy is keyed by origin (scheme+host+port): grants bind
//! an (origin, scope) pair to a state, sessions carry a capability snapshot
//! taken at creation time.

pub mod broker;
pub mod error;
pub mod grants;
pub mod prompt;
pub mod sessions;

pub use {
    broker::{PermissionBroker, PermissionsResult},
    error::{BrokerError, Result},
    grants::{GrantStore, OriginGrants},
    prompt::{PendingPrompts, PermissionPrompter, PromptDecision, PromptRequest},
    sessions::{
        Capabilities, Session, SessionKind, SessionLimits, SessionManager, SessionState,
    },
};

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
