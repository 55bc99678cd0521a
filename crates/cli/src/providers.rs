//! Provider router construction from the environment.

use std::sync::Arc;

use {secrecy::Secret, tracing::info};

use harbor_models::{LlmProvider, OllamaProvider, OpenAiCompatProvider, ProviderRouter};

/// Build the router from env configuration:
/// - `OPENAI_API_KEY` (+ optional `OPENAI_BASE_URL`) enables the hosted
///   OpenAI-compatible adapter;
/// - the local Ollama runtime is always registered (`OLLAMA_BASE_URL`
///   overrides the default port);
/// - `HARBOR_DEFAULT_PROVIDER` picks the default.
pub fn router_from_env() -> Arc<ProviderRouter> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string());
            providers.push(Arc::new(OpenAiCompatProvider::new(
                "openai",
                base_url,
                Some(Secret::new(key)),
            )));
        }
    }

    let ollama_url = std::env::var("OLLAMA_BASE_URL")
        .unwrap_or_else(|_| OllamaProvider::DEFAULT_BASE_URL.to_string());
    providers.push(Arc::new(OllamaProvider::new(ollama_url)));

    let default = std::env::var("HARBOR_DEFAULT_PROVIDER").ok();
    info!(
        providers = providers.len(),
        default = default.as_deref().unwrap_or("(first)"),
        "provider router configured"
    );
    Arc::new(ProviderRouter::new(providers, default))
}
