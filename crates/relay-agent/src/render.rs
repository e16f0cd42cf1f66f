//! Human-readable log entries for tool calls

use relay_ai::{ToolCall, ToolInputError, Value};

/// Describe a tool call for the conversation log
pub fn describe_tool_call(call: &ToolCall) -> String {
    let mut lines = vec![format!("Tool: {}", call.name)];

    let Some(input) = call.input.as_map() else {
        return lines.join("\n");
    };

    let command = input.get("command").and_then(Value::as_str);
    if let Some(command) = command {
        lines.push(format!("Command: {}", command));
    }
    if let Some(path) = input.get("path").and_then(Value::as_str) {
        lines.push(format!("Path: {}", path));
    }

    let text = |key: &str| input.get(key).and_then(Value::as_str).unwrap_or("");

    match command {
        Some("str_replace") => {
            lines.push(format!("Old text:\n{}", text("old_str")));
            lines.push(format!("New text:\n{}", text("new_str")));
        }
        Some("insert") => {
            if let Some(line) = input.get("insert_line") {
                lines.push(format!("Line: {}", line));
            }
            lines.push(format!("Text:\n{}", text("new_str")));
        }
        Some(_) => {}
        None => {
            for (key, value) in input.iter().filter(|(k, _)| k.as_str() != "path") {
                match value.as_str() {
                    Some(s) => lines.push(format!("{}: {}", key, s)),
                    None => lines.push(format!("{}: {}", key, value)),
                }
            }
        }
    }

    lines.join("\n")
}

/// Describe a tool call whose input could not be used
pub fn describe_rejected_call(error: &ToolInputError) -> String {
    format!("Tool: {}\nError: {}", error.tool_name(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ai::DeltaAccumulator;

    fn call(name: &str, json: &str) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: name.into(),
            input: Value::parse(json).unwrap(),
        }
    }

    #[test]
    fn test_str_replace() {
        let text = describe_tool_call(&call(
            "str_replace_editor",
            r#"{"command":"str_replace","path":"/a.rs","old_str":"x","new_str":"y"}"#,
        ));
        assert_eq!(
            text,
            "Tool: str_replace_editor\nCommand: str_replace\nPath: /a.rs\nOld text:\nx\nNew text:\ny"
        );
    }

    #[test]
    fn test_insert() {
        let text = describe_tool_call(&call(
            "str_replace_editor",
            r#"{"command":"insert","path":"/a.rs","insert_line":3,"new_str":"z"}"#,
        ));
        assert_eq!(
            text,
            "Tool: str_replace_editor\nCommand: insert\nPath: /a.rs\nLine: 3\nText:\nz"
        );
    }

    #[test]
    fn test_generic_input() {
        let text = describe_tool_call(&call("LS", r#"{"path":"/repo","depth":2,"all":true}"#));
        assert_eq!(text, "Tool: LS\nPath: /repo\nall: true\ndepth: 2");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(describe_tool_call(&call("list_roots", "{}")), "Tool: list_roots");
    }

    #[test]
    fn test_rejected() {
        let mut acc = DeltaAccumulator::new();
        acc.open(0, Some("t9".into()), Some("view".into()));
        acc.append(0, "[]");
        let err = acc.close(0).unwrap().unwrap_err();
        let text = describe_rejected_call(&err);
        assert!(text.starts_with("Tool: view\nError: "));
        assert!(text.contains("not a JSON object"));
    }
}
