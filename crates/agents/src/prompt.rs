//! System prompt selection for the two dispatch modes.

use crate::dispatch::ToolDescriptor;

const NATIVE_INSTRUCTIONS: &str = "You are a helpful assistant running inside the user's \
browser. Use the provided tools when they help you answer; otherwise answer directly. \
Keep answers concise and user-facing.";

/// Build the system prompt for a run.
///
/// Native-tools models get a minimal instruction — the schemas travel through
/// the API. Text-emulated models get the full JSON-format specification with
/// every tool enumerated, because the prompt is the only channel they have.
pub fn build_system_prompt(
    tools: &[ToolDescriptor],
    native_tools: bool,
    base: Option<&str>,
) -> String {
    let preamble = base.unwrap_or(NATIVE_INSTRUCTIONS);
    if native_tools || tools.is_empty() {
        return preamble.to_string();
    }

    let mut prompt = String::from(preamble);
    prompt.push_str(
        "\n\nYou can call tools. To call a tool, reply with a single JSON object and \
         nothing else:\n\n{\"tool\": \"<tool name>\", \"args\": { ... }}\n\n\
         Use the exact tool name as listed. If no tool is needed, reply with plain text.\n\n\
         Available tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!(
            "\n- {}: {}\n  parameters: {}\n",
            tool.name,
            tool.description,
            serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "{}".into()),
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "time-wasm/time.now".into(),
            description: "Current UTC time".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }]
    }

    #[test]
    fn test_native_prompt_is_minimal() {
        let prompt = build_system_prompt(&tools(), true, None);
        assert!(!prompt.contains("time-wasm/time.now"));
    }

    #[test]
    fn test_text_prompt_enumerates_tools() {
        let prompt = build_system_prompt(&tools(), false, None);
        assert!(prompt.contains("time-wasm/time.now"));
        assert!(prompt.contains("Current UTC time"));
        assert!(prompt.contains("\"tool\""));
    }

    #[test]
    fn test_custom_base_preserved() {
        let prompt = build_system_prompt(&tools(), false, Some("You are a pirate."));
        assert!(prompt.starts_with("You are a pirate."));
        assert!(prompt.contains("time-wasm/time.now"));
    }
}
