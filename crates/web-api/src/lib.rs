//! The in-page API surface and its transport.
//!
//! Three hops carry a call from page code to the helper: the injected
//! facades ([`surface`]) marshal calls into page frames, the background
//! router ([`router`]) correlates them and forwards native requests over the
//! helper channel, and the helper's responses flow back the same way.

pub mod install;
pub mod router;
pub mod surface;

pub use {
    install::{InstallOutcome, PageGlobals, ReadyEvent, plan_install},
    router::{PageRouter, StreamHandle},
    surface::{Agent, AgentSession, Ai, RunOptions, SessionDeclaration, TextSession,
        TextSessionOptions},
};
