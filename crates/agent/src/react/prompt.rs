//! Prompt assembly for a ReAct cycle.

use std::fmt::Write as _;
use tauti_config::ToolServerConfig;
use tauti_core::message::Message;
use tauti_core::tool::ToolResult;

use super::ReActCycle;

/// Instructions, the enabled tool servers, and the transcript so far.
pub fn preamble(servers: &[ToolServerConfig], cycles: &[ReActCycle]) -> String {
    let mut out = String::from(
        "You can call external tools to answer the user. Work in steps, \
         reasoning first and then acting.\n\nTool servers:\n",
    );

    let mut listed = 0;
    for server in servers.iter().filter(|s| s.enabled) {
        let description = match server.description.trim() {
            "" => "No description",
            d => d,
        };
        let _ = writeln!(out, "- {}: {}", server.name, description);
        listed += 1;
    }
    if listed == 0 {
        out.push_str("(none)\n");
    }

    out.push_str(
        "\nTo use a tool, answer in exactly this form:\n\
         Thought: <what you need and why>\n\
         Action: <tool_name>(<arguments as a JSON object>)\n\
         Observation: <filled in with the tool result>\n\n\
         Repeat until you can answer. When no tool is needed, reply with the \
         answer directly.\n",
    );

    if !cycles.is_empty() {
        out.push_str("\nSteps so far:\n");
        for cycle in cycles {
            let _ = writeln!(out, "Thought: {}", cycle.thought);
            if let Some(action) = &cycle.action {
                let _ = writeln!(out, "Action: {}({})", action.name, action.arguments_json());
            }
            if let Some(observation) = &cycle.observation {
                let _ = writeln!(out, "Observation: {observation}");
            }
            out.push('\n');
        }
    }

    out
}

/// The preamble as a leading user message, followed by the real history.
pub fn augmented_messages(
    servers: &[ToolServerConfig],
    cycles: &[ReActCycle],
    history: &[Message],
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::user(preamble(servers, cycles)));
    messages.extend_from_slice(history);
    messages
}

pub fn observation_text(result: &ToolResult) -> String {
    match result {
        ToolResult::Success { result } => format!("Success: {}", result.to_json_string()),
        ToolResult::Failure { error } => format!("Error: {error}"),
    }
}
