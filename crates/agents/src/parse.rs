//! Text-path tool-call extraction.
//!
//! Models without native tool calling are instructed (via the system prompt)
//! to answer with a single JSON object when they want a tool. This locates
//! the first JSON object in the response and accepts either
//! `{"tool": ..., "args": ...}` or `{"name": ..., "parameters": ...}`.

/// Extract `(tool_name, args)` from free text, if a tool-call object is
/// present.
pub fn extract_tool_call_from_text(text: &str) -> Option<(String, serde_json::Value)> {
    for (idx, _) in text.char_indices().filter(|(_, c)| *c == '{') {
        let mut stream =
            serde_json::Deserializer::from_str(&text[idx..]).into_iter::<serde_json::Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };

        if let Some(name) = obj.get("tool").and_then(|v| v.as_str()) {
            let args = obj.get("args").cloned().unwrap_or(serde_json::json!({}));
            return Some((name.to_string(), args));
        }
        if let (Some(name), Some(parameters)) = (
            obj.get("name").and_then(|v| v.as_str()),
            obj.get("parameters"),
        ) {
            return Some((name.to_string(), parameters.clone()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_args_shape() {
        let text = r#"I'll check. {"tool": "time.now", "args": {"tz": "UTC"}} one moment"#;
        let (name, args) = extract_tool_call_from_text(text).unwrap();
        assert_eq!(name, "time.now");
        assert_eq!(args["tz"], "UTC");
    }

    #[test]
    fn test_name_parameters_shape() {
        let text = r#"{"name": "fs/read_file", "parameters": {"path": "/tmp/x"}}"#;
        let (name, args) = extract_tool_call_from_text(text).unwrap();
        assert_eq!(name, "fs/read_file");
        assert_eq!(args["path"], "/tmp/x");
    }

    #[test]
    fn test_args_default_to_empty_object() {
        let (_, args) = extract_tool_call_from_text(r#"{"tool": "time.now"}"#).unwrap();
        assert_eq!(args, serde_json::json!({}));
    }

    #[test]
    fn test_first_json_object_wins() {
        let text = r#"{"tool": "a"} and later {"tool": "b"}"#;
        let (name, _) = extract_tool_call_from_text(text).unwrap();
        assert_eq!(name, "a");
    }

    #[test]
    fn test_skips_non_tool_objects() {
        // A leading object without the expected keys is not a tool call, and
        // nothing later matches either.
        let text = r#"The config is {"port": 8080}. No action needed."#;
        assert!(extract_tool_call_from_text(text).is_none());
    }

    #[test]
    fn test_fenced_json_block() {
        let text = "```json\n{\"tool\": \"time.now\", \"args\": {}}\n```";
        let (name, _) = extract_tool_call_from_text(text).unwrap();
        assert_eq!(name, "time.now");
    }

    #[test]
    fn test_plain_prose_is_none() {
        assert!(extract_tool_call_from_text("The time is 10:30 UTC.").is_none());
    }

    #[test]
    fn test_name_without_parameters_not_a_call() {
        // Guards against matching arbitrary JSON that happens to have "name".
        let text = r#"{"name": "config.yaml", "size": 120}"#;
        assert!(extract_tool_call_from_text(text).is_none());
    }

    #[test]
    fn test_nested_braces_in_args() {
        let text = r#"{"tool": "fs/write", "args": {"data": {"nested": {"deep": 1}}}}"#;
        let (_, args) = extract_tool_call_from_text(text).unwrap();
        assert_eq!(args["data"]["nested"]["deep"], 1);
    }
}
