//! Tool-name resolution against the permitted list.
//!
//! The ladder exists because text-path models mangle qualified names: they
//! drop server prefixes, swap separators, or abbreviate. Each rung is applied
//! in order across the whole list before falling to the next.

use crate::dispatch::ToolDescriptor;

fn short_name(name: &str) -> &str {
    let after_slash = name.rsplit('/').next().unwrap_or(name);
    after_slash.rsplit("__").next().unwrap_or(after_slash)
}

/// Resolve a requested tool name. Rungs, in order: exact, suffix
/// (`*/name`, `*__name`), short-name equality, case-insensitive substring.
pub fn resolve_tool_name(requested: &str, tools: &[ToolDescriptor]) -> Option<String> {
    if requested.is_empty() {
        return None;
    }

    if let Some(t) = tools.iter().find(|t| t.name == requested) {
        return Some(t.name.clone());
    }

    if let Some(t) = tools.iter().find(|t| {
        t.name.ends_with(&format!("/{requested}")) || t.name.ends_with(&format!("__{requested}"))
    }) {
        return Some(t.name.clone());
    }

    if let Some(t) = tools
        .iter()
        .find(|t| short_name(&t.name) == short_name(requested))
    {
        return Some(t.name.clone());
    }

    let lowered = requested.to_lowercase();
    tools
        .iter()
        .find(|t| t.name.to_lowercase().contains(&lowered))
        .map(|t| t.name.clone())
}
