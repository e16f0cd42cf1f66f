//! In-memory file editor used when no tool backend is live

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_ai::ToolDescriptor;
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{ToolDispatcher, ToolInput, ToolOutcome};
use crate::error::Result;

/// Name of the single tool the fallback offers
pub const EDITOR_TOOL: &str = "str_replace_editor";

const MAX_DIFF_LINES: usize = 50;

/// A text editor over an in-memory path → contents map
#[derive(Debug, Default)]
pub struct LocalFallback {
    files: Mutex<HashMap<String, String>>,
}

impl LocalFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with files
    pub fn with_files<P, T>(files: impl IntoIterator<Item = (P, T)>) -> Self
    where
        P: Into<String>,
        T: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(path, text)| (path.into(), text.into()))
            .collect();
        Self {
            files: Mutex::new(files),
        }
    }

    /// Read a file's current contents
    pub fn read_file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    /// Describe the editor tool
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            EDITOR_TOOL,
            Some("View, create and edit text files. Edits replace exact text or insert after a line.".into()),
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert", "undo_edit"],
                    "description": "The operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Path of the file"
                },
                "file_text": {
                    "type": "string",
                    "description": "Contents for `create`"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace for `str_replace`; must occur once"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text for `str_replace`, or text to add for `insert`"
                },
                "insert_line": {
                    "type": "integer",
                    "description": "Line after which `insert` adds text; 0 inserts at the top"
                }
            },
            "required": ["command", "path"]
        }))
    }

    fn run(&self, input: &ToolInput) -> ToolOutcome {
        let command = match input.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutcome::error("Error: Missing 'command' parameter"),
        };

        if command == "undo_edit" {
            return ToolOutcome::error("Error: undo_edit is not supported");
        }

        let path = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutcome::error("Error: Missing 'path' parameter"),
        };

        match command {
            "view" => self.view(path),
            "create" => match string_param(input, "file_text") {
                Ok(text) => self.create(path, text),
                Err(outcome) => outcome,
            },
            "str_replace" => {
                let old_str = match string_param(input, "old_str") {
                    Ok(s) => s,
                    Err(outcome) => return outcome,
                };
                let new_str = input.get("new_str").and_then(|v| v.as_str()).unwrap_or("");
                self.str_replace(path, old_str, new_str)
            }
            "insert" => {
                let line = match input.get("insert_line").and_then(|v| v.as_u64()) {
                    Some(l) => match usize::try_from(l) {
                        Ok(l) => l,
                        Err(_) => {
                            return ToolOutcome::error(format!("Error: insert_line {} is out of range", l));
                        }
                    },
                    None => return ToolOutcome::error("Error: Missing 'insert_line' parameter"),
                };
                match string_param(input, "new_str") {
                    Ok(text) => self.insert(path, line, text),
                    Err(outcome) => outcome,
                }
            }
            other => ToolOutcome::error(format!("Error: Unknown command: {}", other)),
        }
    }

    fn view(&self, path: &str) -> ToolOutcome {
        match self.files.lock().get(path) {
            Some(content) => ToolOutcome::text(content.clone()),
            None => not_found(path),
        }
    }

    fn create(&self, path: &str, text: &str) -> ToolOutcome {
        self.files.lock().insert(path.to_string(), text.to_string());
        ToolOutcome::text(format!("File created successfully at: {}", path))
    }

    fn str_replace(&self, path: &str, old_str: &str, new_str: &str) -> ToolOutcome {
        let mut files = self.files.lock();
        let content = match files.get_mut(path) {
            Some(c) => c,
            None => return not_found(path),
        };

        if old_str.is_empty() {
            return ToolOutcome::error("Error: 'old_str' must not be empty");
        }

        match count_occurrences(content, old_str) {
            0 => ToolOutcome::error(format!(
                "Error: No match found for replacement text in {}",
                path
            )),
            1 => {
                let updated = content.replacen(old_str, new_str, 1);
                let diff = generate_diff(content, &updated);
                *content = updated;
                ToolOutcome::text(format!("The file {} has been edited.\n\nDiff:\n{}", path, diff))
            }
            n => ToolOutcome::error(format!(
                "Error: Found {} occurrences of the text in {}. The text must be unique.",
                n, path
            )),
        }
    }

    fn insert(&self, path: &str, line: usize, text: &str) -> ToolOutcome {
        let mut files = self.files.lock();
        let content = match files.get_mut(path) {
            Some(c) => c,
            None => return not_found(path),
        };

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if line > lines.len() {
            return ToolOutcome::error(format!(
                "Error: insert_line {} is past the end of {} ({} lines)",
                line,
                path,
                lines.len()
            ));
        }

        let mut updated = String::with_capacity(content.len() + text.len() + 2);
        for l in &lines[..line] {
            updated.push_str(l);
        }
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(text);
        if line < lines.len() && !text.ends_with('\n') {
            updated.push('\n');
        }
        for l in &lines[line..] {
            updated.push_str(l);
        }

        *content = updated;
        ToolOutcome::text(format!("Inserted text after line {} of {}", line, path))
    }
}

#[async_trait]
impl ToolDispatcher for LocalFallback {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(vec![Self::descriptor()])
    }

    async fn invoke(&self, name: &str, input: ToolInput, cancel: CancellationToken) -> ToolOutcome {
        if cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }
        if name != EDITOR_TOOL {
            return ToolOutcome::error(format!("Error: Unknown tool: {}", name));
        }
        let outcome = self.run(&input);
        tracing::debug!("Local {} finished (error: {})", name, outcome.is_error);
        outcome
    }
}

fn string_param<'a>(input: &'a ToolInput, key: &str) -> std::result::Result<&'a str, ToolOutcome> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolOutcome::error(format!("Error: Missing '{}' parameter", key)))
}

/// Count matches of `needle`, including overlapping ones
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack
        .char_indices()
        .filter(|(i, _)| haystack[*i..].starts_with(needle))
        .count()
}

fn not_found(path: &str) -> ToolOutcome {
    ToolOutcome::error(format!("Error: File not found: {}", path))
}

/// Generate a line diff, truncated for display
fn generate_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = Vec::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push(format!("{}{}", sign, change));
    }

    if output.len() > MAX_DIFF_LINES {
        output.truncate(MAX_DIFF_LINES);
        output.push("... (diff truncated)\n".to_string());
    }

    output.join("")
}
