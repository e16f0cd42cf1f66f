//! Reassembly of tool-call arguments from streamed JSON fragments

use crate::value::{Value, ValueError};
use std::collections::HashMap;
use thiserror::Error;

/// Id recorded when a tool block arrives without one
pub const UNKNOWN_TOOL_ID: &str = "unknown_tool_id";
/// Name recorded when a tool block arrives without one
pub const UNKNOWN_TOOL_NAME: &str = "unknown_tool_name";

/// Tools without parameters stream no JSON at all
const EMPTY_OBJECT: &str = "{}";

/// An in-flight tool-use block
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorEntry {
    pub block_index: usize,
    pub tool_use_id: String,
    pub tool_name: String,
    pub partial_json: String,
}

/// A fully reassembled tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Always a [`Value::Map`]
    pub input: Value,
}

/// Why a closed block did not yield a tool call
#[derive(Error, Debug)]
pub enum ToolInputError {
    #[error("failed to parse input for tool {name} ({id}): {source}")]
    Parse {
        id: String,
        name: String,
        source: ValueError,
    },

    #[error("input for tool {name} ({id}) is not a JSON object")]
    NotAnObject { id: String, name: String },
}

impl ToolInputError {
    pub fn tool_use_id(&self) -> &str {
        match self {
            Self::Parse { id, .. } | Self::NotAnObject { id, .. } => id,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Parse { name, .. } | Self::NotAnObject { name, .. } => name,
        }
    }
}

/// Buffers tool-argument fragments per content-block index.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    open: HashMap<usize, AccumulatorEntry>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an entry for a tool-use block.
    pub fn open(&mut self, index: usize, tool_use_id: Option<String>, tool_name: Option<String>) {
        let entry = AccumulatorEntry {
            block_index: index,
            tool_use_id: tool_use_id.unwrap_or_else(|| UNKNOWN_TOOL_ID.to_string()),
            tool_name: tool_name.unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string()),
            partial_json: String::new(),
        };
        if let Some(previous) = self.open.insert(index, entry) {
            tracing::warn!(
                "Block {} reopened before stop, discarding buffered input for {}",
                index,
                previous.tool_name
            );
        }
    }

    /// Append a fragment. Returns `false` if no entry is open at `index`.
    pub fn append(&mut self, index: usize, fragment: &str) -> bool {
        match self.open.get_mut(&index) {
            Some(entry) => {
                entry.partial_json.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Close the entry at `index` and parse its input.
    ///
    /// Returns `None` if nothing was open there.
    pub fn close(&mut self, index: usize) -> Option<Result<ToolCall, ToolInputError>> {
        let entry = self.open.remove(&index)?;

        let text = if entry.partial_json.trim().is_empty() {
            EMPTY_OBJECT
        } else {
            entry.partial_json.as_str()
        };

        let result = match Value::parse(text) {
            Ok(input @ Value::Map(_)) => Ok(ToolCall {
                id: entry.tool_use_id,
                name: entry.tool_name,
                input,
            }),
            Ok(_) => Err(ToolInputError::NotAnObject {
                id: entry.tool_use_id,
                name: entry.tool_name,
            }),
            Err(source) => Err(ToolInputError::Parse {
                id: entry.tool_use_id,
                name: entry.tool_name,
                source,
            }),
        };

        Some(result)
    }

    /// Get the open entry at `index`
    pub fn entry(&self, index: usize) -> Option<&AccumulatorEntry> {
        self.open.get(&index)
    }

    /// Number of open entries
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Drop every open entry, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.open.len();
        self.open.clear();
        discarded
    }
}
