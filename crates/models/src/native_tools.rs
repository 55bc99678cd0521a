//! Native tool-calling support is decided by a closed classifier, not probing.

/// Hosted providers that always support structured tool calls.
const NATIVE_PROVIDERS: [&str; 5] = ["openai", "anthropic", "google", "mistral", "groq"];

/// Local-runtime models known to handle tool calling. Matched by substring
/// over the model id.
const LOCAL_NATIVE_MODELS: [&str; 7] = [
    "llama3.1",
    "llama3.2",
    "llama3.3",
    "mistral-nemo",
    "mistral-large",
    "qwen2.5",
    "command-r",
];

pub fn supports_native_tools(provider: &str, model: &str) -> bool {
    let provider = provider.to_ascii_lowercase();
    if NATIVE_PROVIDERS.contains(&provider.as_str()) {
        return true;
    }
    if provider == "ollama" || provider == "local" {
        let model = model.to_ascii_lowercase();
        return LOCAL_NATIVE_MODELS.iter().any(|m| model.contains(m));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosted_providers_always_native() {
        assert!(supports_native_tools("openai", "gpt-4o"));
        assert!(supports_native_tools("Anthropic", "claude-sonnet"));
        assert!(supports_native_tools("mistral", "anything"));
    }

    #[test]
    fn test_local_whitelist_substring() {
        assert!(supports_native_tools("ollama", "llama3.1:8b"));
        assert!(supports_native_tools("ollama", "qwen2.5-coder:14b"));
        assert!(supports_native_tools("ollama", "Command-R-plus"));
        assert!(!supports_native_tools("ollama", "llama2:7b"));
        assert!(!supports_native_tools("ollama", "phi3"));
    }

    #[test]
    fn test_unknown_provider_is_text_path() {
        assert!(!supports_native_tools("mystery", "gpt-4o"));
    }
}
