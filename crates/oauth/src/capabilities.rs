//! OAuth source selection.
//!
//! Given a manifest's declared requirements and what Harbor itself is
//! configured for, pick where the flow runs: `host` with Harbor's own
//! credentials, `user` with user-supplied ones, or `server` (hands off). A
//! manifest no source can satisfy blocks installation.

use std::collections::{HashMap, HashSet};

use crate::{
    error::{Error, Result},
    types::{OAuthManifest, TokenSource},
};

/// What Harbor can offer for one provider in `host` mode.
#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub available_scopes: HashSet<String>,
    pub enabled_apis: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HostCapabilities {
    pub providers: HashMap<String, ProviderCapabilities>,
}

impl HostCapabilities {
    /// `host` works iff the provider is configured, every requested scope is
    /// available, and every requested API is enabled.
    pub fn satisfies(&self, manifest: &OAuthManifest) -> bool {
        let Some(caps) = self.providers.get(&manifest.provider) else {
            return false;
        };
        manifest
            .scopes
            .iter()
            .all(|s| caps.available_scopes.contains(s))
            && manifest.apis.iter().all(|a| caps.enabled_apis.contains(a))
    }
}

/// Choose the source for a manifest. `preferred_source` wins when that
/// preference is satisfiable; otherwise host → user → server in order.
pub fn check_capabilities(
    manifest: &OAuthManifest,
    host: &HostCapabilities,
) -> Result<TokenSource> {
    let satisfiable = |source: TokenSource| -> bool {
        if !manifest.supported_sources.contains(&source) {
            return false;
        }
        match source {
            TokenSource::Host => host.satisfies(manifest),
            TokenSource::User | TokenSource::Server => true,
        }
    };

    if let Some(preferred) = manifest.preferred_source {
        if satisfiable(preferred) {
            return Ok(preferred);
        }
    }

    for source in [TokenSource::Host, TokenSource::User, TokenSource::Server] {
        if satisfiable(source) {
            return Ok(source);
        }
    }

    Err(Error::Unhandleable {
        provider: manifest.provider.clone(),
        reason: "no supported source is satisfiable".into(),
    })
}
