//! Provider routing: explicit `provider` param, else the configured default,
//! else the first available.

use std::sync::Arc;

use crate::{
    error::{ModelError, Result},
    model::{LlmProvider, ModelInfo},
};

pub struct ProviderRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    default_provider: Option<String>,
}

impl ProviderRouter {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, default_provider: Option<String>) -> Self {
        Self {
            providers,
            default_provider,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    fn by_name(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Resolve which adapter serves a request.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        if let Some(name) = explicit {
            return self
                .by_name(name)
                .ok_or_else(|| ModelError::UnknownProvider(name.to_string()));
        }
        if let Some(default) = &self.default_provider {
            if let Some(provider) = self.by_name(default) {
                return Ok(provider);
            }
        }
        self.providers.first().cloned().ok_or(ModelError::NoProviders)
    }

    /// The provider a bare request would hit.
    pub fn active(&self) -> Result<Arc<dyn LlmProvider>> {
        self.resolve(None)
    }

    /// Models across every provider, tagged `provider::model`.
    pub async fn list_all_models(&self) -> Vec<(String, Vec<ModelInfo>)> {
        let mut out = Vec::new();
        for provider in &self.providers {
            let models = provider.list_models().await.unwrap_or_default();
            out.push((provider.name().to_string(), models));
        }
        out
    }
}
