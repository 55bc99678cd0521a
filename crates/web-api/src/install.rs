//! Install-guard semantics for the page globals.
//!
//! The content script decides, per page, whether to define `ai` and `agent`.
//! `ai` yields to an existing implementation (Chrome's built-in AI or another
//! extension); `agent` is always installed when unset. The decision is a pure
//! function so the injection script stays trivial.

use serde::{Deserialize, Serialize};

/// What the injector observed on the page global object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGlobals {
    pub has_ai: bool,
    /// Whether an existing `ai` property could be redefined at all.
    pub ai_configurable: bool,
    pub has_agent: bool,
    pub agent_configurable: bool,
}

/// Payload of the ready event fired once installation completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    pub version: String,
    pub chrome_ai_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub install_ai: bool,
    pub install_agent: bool,
    pub ready: ReadyEvent,
}

pub fn plan_install(globals: &PageGlobals) -> InstallOutcome {
    let install_ai = !globals.has_ai;
    let install_agent = !globals.has_agent;
    InstallOutcome {
        install_ai,
        install_agent,
        ready: ReadyEvent {
            version: env!("CARGO_PKG_VERSION").to_string(),
            chrome_ai_detected: globals.has_ai,
        },
    }
}
