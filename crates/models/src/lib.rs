//! LLM provider abstraction: adapters for hosted and local model runtimes,
//! the router that picks among them, and the native-tool-calling classifier.

pub mod error;
pub mod model;
pub mod native_tools;
pub mod ollama;
pub mod openai_compat;
pub mod router;

pub use {
    error::{ModelError, Result},
    model::{ChatRequest, ChatResponse, LlmProvider, ModelInfo, TokenEvent, TokenStream,
        ToolCallRequest},
    native_tools::supports_native_tools,
    ollama::OllamaProvider,
    openai_compat::OpenAiCompatProvider,
    router::ProviderRouter,
};

/// Shared HTTP client for LLM providers.
///
/// All providers that don't need custom redirect/proxy settings reuse this
/// client to share connection pools, DNS cache, and TLS sessions.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}
