//! Installer: runtime detection, install-state persistence, secret storage,
//! and launch-spec resolution for MCP servers.
//!
//! The installer never talks to a child process — it resolves *how* a server
//! would be launched (command line + merged env) and hands the result to the
//! MCP manager.

pub mod installer;
pub mod manifest;
pub mod runtimes;
pub mod secrets;

pub use {
    installer::{InstallState, InstalledServer, Installer},
    manifest::{PackageKind, PackageSpec, RuntimeHints, ServerManifest},
    runtimes::{RuntimeCache, RuntimeKind, RuntimeReport},
    secrets::SecretsStore,
};
