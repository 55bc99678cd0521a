//! Server manifests: what a catalog entry or user supplies to describe how a
//! server is obtained and launched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::runtimes::RuntimeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Node,
    Python,
    Container,
    Binary,
}

impl PackageKind {
    pub fn runtime(&self) -> RuntimeKind {
        match self {
            PackageKind::Node => RuntimeKind::Node,
            PackageKind::Python => RuntimeKind::Python,
            PackageKind::Container => RuntimeKind::Container,
            PackageKind::Binary => RuntimeKind::Binary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub kind: PackageKind,
    /// npm name, PyPI name, image reference, or a filesystem path.
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeHints {
    /// Native code prefers the container runtime when one is present.
    #[serde(default)]
    pub has_native_code: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub packages: Vec<PackageSpec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<harbor_oauth::OAuthManifest>,
    #[serde(default)]
    pub runtime: RuntimeHints,
}
