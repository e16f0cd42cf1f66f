//! Stream protocol interpretation
//!
//! [`StreamInterpreter`] turns decoded [`StreamEvent`]s into [`Action`]s for
//! whoever owns the message log. It holds the [`DeltaAccumulator`] for the
//! response in flight and nothing else, so the owner stays the only writer of
//! conversation state.

use crate::accumulator::{DeltaAccumulator, ToolCall, ToolInputError};
use crate::stream::{ApiError, BlockDelta, BlockStart, StreamEvent};

/// What the owner of the conversation should do in response to an event
#[derive(Debug)]
pub enum Action {
    /// Append text to the active assistant message
    AppendText(String),
    /// A tool-use block closed with a well-formed input
    ToolCall(ToolCall),
    /// A tool-use block closed but its input could not be used
    ToolCallRejected(ToolInputError),
    /// The upstream reported an error; the response is over
    Failed(ApiError),
    /// The response completed
    Finished,
}

/// Routes stream events to the accumulator or the message log
#[derive(Debug, Default)]
pub struct StreamInterpreter {
    accumulator: DeltaAccumulator,
    halted: bool,
}

impl StreamInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret one event.
    ///
    /// Once an error or `message_stop` has been seen, every later event of the
    /// same response is ignored until [`reset`](Self::reset).
    pub fn interpret(&mut self, event: StreamEvent) -> Option<Action> {
        if self.halted {
            tracing::debug!("Ignoring event after end of response: {:?}", event);
            return None;
        }

        match event {
            StreamEvent::MessageStart => None,
            StreamEvent::ContentBlockStart { index, block } => self.block_start(index, block),
            StreamEvent::ContentBlockDelta { index, delta } => self.block_delta(index, delta),
            StreamEvent::ContentBlockStop { index } => match self.accumulator.close(index)? {
                Ok(call) => {
                    tracing::debug!("Tool call complete: {} ({})", call.name, call.id);
                    Some(Action::ToolCall(call))
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    Some(Action::ToolCallRejected(e))
                }
            },
            StreamEvent::MessageDelta { text, stop_reason } => {
                if let Some(reason) = stop_reason {
                    tracing::debug!("Stop reason: {}", reason);
                }
                non_empty(text).map(Action::AppendText)
            }
            StreamEvent::MessageStop => {
                self.halt();
                Some(Action::Finished)
            }
            StreamEvent::Error { error } => {
                self.halt();
                Some(Action::Failed(error))
            }
        }
    }

    fn block_start(&mut self, index: usize, block: BlockStart) -> Option<Action> {
        if block.is_tool_use() {
            tracing::debug!("Tool block {} opened: {:?}", index, block.name);
            self.accumulator.open(index, block.id, block.name);
            return None;
        }
        non_empty(block.text).map(Action::AppendText)
    }

    fn block_delta(&mut self, index: usize, delta: BlockDelta) -> Option<Action> {
        if delta.is_tool_argument() {
            let fragment = delta.partial_json.unwrap_or_default();
            if !self.accumulator.append(index, &fragment) {
                tracing::warn!(
                    "Dropping tool argument fragment for block {} with no open tool call",
                    index
                );
            }
            return None;
        }

        match delta.text {
            Some(text) if !text.is_empty() => Some(Action::AppendText(text)),
            Some(_) => None,
            None => {
                tracing::debug!("Ignoring {} delta for block {}", delta.kind, index);
                None
            }
        }
    }

    fn halt(&mut self) {
        self.halted = true;
        let discarded = self.accumulator.clear();
        if discarded > 0 {
            tracing::warn!("Response ended with {} unfinished tool block(s)", discarded);
        }
    }

    /// Whether the current response has ended
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Number of tool blocks still buffering input
    pub fn open_tool_blocks(&self) -> usize {
        self.accumulator.open_count()
    }

    /// Prepare for a new response
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.halted = false;
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}
