//! Thought / Action parser for ReAct model output.
//!
//! Grammar (markers are case-insensitive and must start a line):
//!
//! ```text
//! [Thought: <text>]
//! [Action: <tool>(<json object>)]
//! ```
//!
//! The JSON payload may span lines; its end is found with serde_json's
//! streaming deserializer rather than by matching parentheses.

use serde_json::Value;
use tauti_core::tool::ToolCall;

const THOUGHT: &str = "thought:";
const ACTION: &str = "action:";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// The reasoning text, or the whole answer when there is no action.
    pub thought: String,
    pub action: Option<ToolCall>,
}

/// An `Action:` line named a tool but its arguments are not a JSON object.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid arguments for '{tool}': {reason}")]
pub struct ActionParseError {
    pub thought: String,
    pub tool: String,
    /// The argument text as written by the model
    pub raw: String,
    pub reason: String,
}

/// Parse one complete model response.
pub fn parse_response(text: &str) -> Result<ParsedResponse, ActionParseError> {
    let Some((action_at, tool, args_at)) = find_action(text) else {
        return Ok(ParsedResponse {
            thought: strip_thought_marker(text),
            action: None,
        });
    };

    let thought = strip_thought_marker(&text[..action_at]);
    let rest = &text[args_at..];

    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    let parsed = match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(e.to_string()),
        None => Err("missing arguments".to_string()),
    };

    let fail = |reason: String| ActionParseError {
        thought: thought.clone(),
        tool: tool.to_string(),
        raw: raw_arguments(rest),
        reason,
    };

    let value = parsed.map_err(&fail)?;
    let call = ToolCall::from_json(tool, value).map_err(|e| fail(e.to_string()))?;

    Ok(ParsedResponse {
        thought,
        action: Some(call),
    })
}

/// Locate the first `Action: name(` line. Returns the byte offset of the
/// line, the tool name, and the offset just past `(`.
fn find_action(text: &str) -> Option<(usize, &str, usize)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let trimmed = line.trim_start();
        if !starts_with_ignore_case(trimmed, ACTION) {
            continue;
        }
        let after_marker_at = line_start + (line.len() - trimmed.len()) + ACTION.len();
        let after_marker = &text[after_marker_at..];
        let name_start = after_marker.len() - after_marker.trim_start().len();
        let name_and_rest = &after_marker[name_start..];

        let name_len = name_and_rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .unwrap_or(name_and_rest.len());
        if name_len == 0 {
            continue;
        }
        let name = &name_and_rest[..name_len];
        let after_name = &name_and_rest[name_len..];
        let gap = after_name.len() - after_name.trim_start_matches([' ', '\t']).len();
        if !after_name[gap..].starts_with('(') {
            continue;
        }

        let args_at = after_marker_at + name_start + name_len + gap + 1;
        return Some((line_start, name, args_at));
    }
    None
}

/// Argument text for diagnostics: up to the last `)` on the action line.
fn raw_arguments(rest: &str) -> String {
    let line = rest.lines().next().unwrap_or_default();
    match line.rfind(')') {
        Some(end) => line[..end].trim().to_string(),
        None => line.trim().to_string(),
    }
}

fn strip_thought_marker(text: &str) -> String {
    let trimmed = text.trim();
    if starts_with_ignore_case(trimmed, THOUGHT) {
        trimmed[THOUGHT.len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_answer_has_no_action() {
        let parsed = parse_response("Thought: The capital of France is Paris.").unwrap();
        assert_eq!(parsed.thought, "The capital of France is Paris.");
        assert!(parsed.action.is_none());

        let parsed = parse_response("Just an answer\nover two lines").unwrap();
        assert_eq!(parsed.thought, "Just an answer\nover two lines");
    }

    #[test]
    fn thought_and_action() {
        let text = "Thought: I should read the file.\nAction: read_file({\"path\":\"x\"})";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.thought, "I should read the file.");
        let call = parsed.action.unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments_json(), json!({"path": "x"}));
    }

    #[test]
    fn markers_are_case_insensitive_and_spacing_tolerant() {
        let text = "thought: look it up\n  ACTION:   search ( {\"q\": \"rust (lang)\"} )\n";
        let call = parse_response(text).unwrap().action.unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments_json(), json!({"q": "rust (lang)"}));
    }

    #[test]
    fn arguments_may_span_lines() {
        let text = "Thought: list it\nAction: list_dir({\n  \"path\": \"/tmp\",\n  \"depth\": 2\n})\nObservation:";
        let call = parse_response(text).unwrap().action.unwrap();
        assert_eq!(call.arguments_json(), json!({"path": "/tmp", "depth": 2}));
    }

    #[test]
    fn malformed_arguments_are_an_error() {
        let err = parse_response("Thought: try\nAction: read_file({path: x})").unwrap_err();
        assert_eq!(err.tool, "read_file");
        assert_eq!(err.raw, "{path: x}");
        assert_eq!(err.thought, "try");
    }

    #[test]
    fn non_object_arguments_are_an_error() {
        let err = parse_response("Action: read_file([\"x\"])").unwrap_err();
        assert_eq!(err.raw, "[\"x\"]");
    }

    #[test]
    fn action_without_call_syntax_is_not_an_action() {
        let parsed = parse_response("Thought: done\nAction: none").unwrap();
        assert!(parsed.action.is_none());
    }

    #[test]
    fn action_must_start_a_line() {
        let parsed = parse_response("The next Action: foo({}) is not needed").unwrap();
        assert!(parsed.action.is_none());
    }
}
