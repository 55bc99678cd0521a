//! The agent orchestrator: drives an LLM through zero or more tool calls to a
//! final answer, as a lazy stream of events.

pub mod dispatch;
pub mod events;
pub mod parse;
pub mod prompt;
pub mod resolve;
pub mod runner;

pub use {
    dispatch::{ToolDescriptor, ToolDispatcher},
    events::AgentEvent,
    parse::extract_tool_call_from_text,
    prompt::build_system_prompt,
    resolve::resolve_tool_name,
    runner::{RunConfig, run_agent},
};
