//! Runtime detection: which package runners exist on this machine.
//!
//! The cache is warmed once at helper start so launch-spec resolution never
//! blocks on `PATH` walks.

use std::{collections::HashMap, path::PathBuf};

use {
    serde::Serialize,
    tracing::{debug, info},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Node package runner (`npx`).
    Node,
    /// Python package runner (`uvx`).
    Python,
    /// Container runtime (`docker`).
    Container,
    /// A plain executable already on disk.
    Binary,
}

impl RuntimeKind {
    pub fn runner_command(&self) -> Option<&'static str> {
        match self {
            RuntimeKind::Node => Some("npx"),
            RuntimeKind::Python => Some("uvx"),
            RuntimeKind::Container => Some("docker"),
            RuntimeKind::Binary => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeReport {
    pub runtime: RuntimeKind,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Resolved runner paths, warmed at startup.
#[derive(Debug, Clone, Default)]
pub struct RuntimeCache {
    resolved: HashMap<RuntimeKind, PathBuf>,
}

impl RuntimeCache {
    /// Locate every known runner on `PATH`.
    pub fn warm() -> Self {
        let mut resolved = HashMap::new();
        for kind in [RuntimeKind::Node, RuntimeKind::Python, RuntimeKind::Container] {
            let Some(command) = kind.runner_command() else {
                continue;
            };
            match which::which(command) {
                Ok(path) => {
                    debug!(runtime = ?kind, path = %path.display(), "runtime found");
                    resolved.insert(kind, path);
                },
                Err(_) => debug!(runtime = ?kind, command, "runtime not found"),
            }
        }
        info!(available = resolved.len(), "runtime cache warmed");
        Self { resolved }
    }

    /// A cache with explicit entries, for tests.
    pub fn with_entries(entries: impl IntoIterator<Item = (RuntimeKind, PathBuf)>) -> Self {
        Self {
            resolved: entries.into_iter().collect(),
        }
    }

    pub fn available(&self, kind: RuntimeKind) -> bool {
        kind == RuntimeKind::Binary || self.resolved.contains_key(&kind)
    }

    pub fn path(&self, kind: RuntimeKind) -> Option<&PathBuf> {
        self.resolved.get(&kind)
    }

    /// The `check_runtimes` report, with versions probed where cheap.
    pub async fn report(&self) -> Vec<RuntimeReport> {
        let mut reports = Vec::new();
        for kind in [RuntimeKind::Node, RuntimeKind::Python, RuntimeKind::Container] {
            let path = self.resolved.get(&kind);
            let version = match path {
                Some(path) => probe_version(path).await,
                None => None,
            };
            reports.push(RuntimeReport {
                runtime: kind,
                available: path.is_some(),
                path: path.map(|p| p.display().to_string()),
                version,
            });
        }
        reports
    }
}

async fn probe_version(path: &PathBuf) -> Option<String> {
    let output = tokio::process::Command::new(path)
        .arg("--version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next().map(|l| l.trim().to_string())
}
