//! The conversation state machine
//!
//! A [`Session`] owns the message log and drives two kinds of background
//! task: a stream task that fetches the tool catalogue, issues the model
//! request and forwards decoded events, and a tool task that runs a single
//! dispatcher call. Both report back through one inbox. The owner applies
//! what arrives with [`Session::pump`], so every state change happens on the
//! owner's side of `&mut self`.
//!
//! Each task carries a generation number. Starting a task cancels its
//! predecessor, and anything an older generation still delivers is dropped.

use futures::StreamExt;
use relay_ai::{
    Action, ChatRequest, Message, Model, ModelClient, StreamEvent, StreamInterpreter, ToolCall,
    to_upstream,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    approval::{ApprovalPolicy, ManualApproval},
    conversation::{Conversation, PendingToolUse, Phase},
    dispatch::{SharedDispatcher, ToolOutcome},
    envelope::ToolResultEnvelope,
    error::{Error, Result},
    events::SessionEvent,
    render::{describe_rejected_call, describe_tool_call},
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model to use
    pub model: Model,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl SessionConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            system_prompt: None,
            temperature: None,
        }
    }
}

/// What a background task reports
#[derive(Debug)]
enum TaskReport {
    Stream { generation: u64, update: StreamUpdate },
    Tool { generation: u64, outcome: ToolOutcome },
}

#[derive(Debug)]
enum StreamUpdate {
    Event(StreamEvent),
    Failed(String),
    Ended,
}

struct StreamTask {
    generation: u64,
    cancel: CancellationToken,
}

struct ToolTask {
    generation: u64,
    cancel: CancellationToken,
    tool_use_id: String,
    tool_name: String,
}

/// A conversation with a model that can call tools
pub struct Session {
    config: SessionConfig,
    client: Arc<dyn ModelClient>,
    dispatcher: SharedDispatcher,
    approval: Box<dyn ApprovalPolicy>,
    conversation: Conversation,
    interpreter: StreamInterpreter,
    event_tx: broadcast::Sender<SessionEvent>,
    inbox_tx: mpsc::UnboundedSender<TaskReport>,
    inbox_rx: mpsc::UnboundedReceiver<TaskReport>,
    stream: Option<StreamTask>,
    tool: Option<ToolTask>,
    generation: u64,
    /// The last response reached its end without error or cancellation
    response_complete: bool,
}

impl Session {
    /// Create a session with manual approval
    pub fn new(
        config: SessionConfig,
        client: Arc<dyn ModelClient>,
        dispatcher: SharedDispatcher,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            client,
            dispatcher,
            approval: Box::new(ManualApproval),
            conversation: Conversation::default(),
            interpreter: StreamInterpreter::new(),
            event_tx,
            inbox_tx,
            inbox_rx,
            stream: None,
            tool: None,
            generation: 0,
            response_complete: false,
        }
    }

    /// Replace the approval policy
    pub fn with_approval(mut self, approval: impl ApprovalPolicy + 'static) -> Self {
        self.approval = Box::new(approval);
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current state
    pub fn state(&self) -> &Conversation {
        &self.conversation
    }

    /// Get the session config
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn phase(&self) -> Phase {
        self.conversation.phase()
    }

    pub fn is_streaming(&self) -> bool {
        self.conversation.streaming
    }

    pub fn waiting_for_approval(&self) -> bool {
        self.conversation.waiting_for_approval()
    }

    pub fn pending_tool_use(&self) -> Option<&PendingToolUse> {
        self.conversation.pending_tool_use.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.conversation.error_message.as_deref()
    }

    /// Whether any background task is live
    pub fn is_busy(&self) -> bool {
        self.stream.is_some() || self.tool.is_some()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn push(&mut self, message: Message) {
        self.conversation.push(message.clone());
        self.emit(SessionEvent::MessageAppended { message });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Send a user message and start streaming the reply.
    pub fn submit(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        self.cancel_tool();
        self.push(Message::user(text));
        self.start_stream();
        Ok(())
    }

    /// Send the pending tool result back and continue the conversation.
    ///
    /// Returns `false` if nothing was pending.
    pub fn approve(&mut self) -> bool {
        let Some(pending) = self.conversation.pending_tool_use.take() else {
            return false;
        };

        match ToolResultEnvelope::from(&pending).to_json() {
            Ok(envelope) => {
                tracing::debug!("Approved result of {} ({})", pending.tool_name, pending.tool_use_id);
                let message = Message::assistant(envelope);
                self.conversation.push(message.clone());
                self.emit(SessionEvent::ResultApproved { message });
                self.start_stream();
            }
            Err(e) => self.fail(format!("Failed to encode tool result: {}", e)),
        }
        true
    }

    /// Cancel the executing or pending tool without continuing.
    ///
    /// Returns `false` if there was nothing to cancel.
    pub fn cancel_tool(&mut self) -> bool {
        let mut cancelled = None;

        if let Some(task) = self.tool.take() {
            task.cancel.cancel();
            self.conversation.tool_running = false;
            cancelled = Some(task.tool_use_id);
        }
        if let Some(pending) = self.conversation.pending_tool_use.take() {
            cancelled = Some(pending.tool_use_id);
        }

        match cancelled {
            Some(tool_use_id) => {
                tracing::debug!("Cancelled tool use {}", tool_use_id);
                self.emit(SessionEvent::ToolCancelled { tool_use_id });
                true
            }
            None => false,
        }
    }

    /// Cancel the streaming response.
    ///
    /// Returns `false` if nothing was streaming.
    pub fn cancel_stream(&mut self) -> bool {
        let Some(task) = self.stream.take() else {
            return false;
        };
        task.cancel.cancel();
        self.interpreter.reset();
        self.conversation.streaming = false;
        self.response_complete = false;

        if let Some((message_id, delta)) = self.conversation.mark_cancelled() {
            self.emit(SessionEvent::TextDelta { message_id, delta });
        }
        self.emit(SessionEvent::StreamEnded { cancelled: true });
        true
    }

    /// Wait for one background report and apply it.
    ///
    /// Returns `false` without waiting when no task is live. Cancel-safe:
    /// dropping the future loses nothing.
    pub async fn pump(&mut self) -> bool {
        if !self.is_busy() {
            return false;
        }
        match self.inbox_rx.recv().await {
            Some(report) => {
                self.apply(report);
                true
            }
            None => false,
        }
    }

    /// Pump until no task is live
    pub async fn run_until_settled(&mut self) {
        while self.pump().await {}
    }

    fn start_stream(&mut self) {
        self.cancel_stream();

        let generation = self.next_generation();
        let cancel = CancellationToken::new();

        self.interpreter.reset();
        self.conversation.error_message = None;
        self.conversation.streaming = true;
        self.response_complete = false;
        let placeholder = self.conversation.begin_response();
        if let Some(message) = self.conversation.get(placeholder).cloned() {
            self.emit(SessionEvent::MessageAppended { message });
        }
        self.emit(SessionEvent::StreamStarted);

        let request = ChatRequest {
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            messages: to_upstream(&self.conversation.messages),
            tools: vec![],
            temperature: self.config.temperature,
        };

        tokio::spawn(run_stream(
            generation,
            request,
            Arc::clone(&self.client),
            Arc::clone(&self.dispatcher),
            cancel.clone(),
            self.inbox_tx.clone(),
        ));

        self.stream = Some(StreamTask { generation, cancel });
    }

    fn start_tool(&mut self, call: ToolCall) {
        let generation = self.next_generation();
        let cancel = CancellationToken::new();

        self.conversation.tool_running = true;
        self.emit(SessionEvent::ToolStarted {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
        });

        let dispatcher = Arc::clone(&self.dispatcher);
        let tx = self.inbox_tx.clone();
        let token = cancel.clone();
        let name = call.name.clone();
        let input = call.input.to_arguments();

        tracing::debug!("Executing {} ({})", call.name, call.id);
        tokio::spawn(async move {
            let outcome = dispatcher.invoke(&name, input, token.clone()).await;
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(TaskReport::Tool {
                generation,
                outcome,
            });
        });

        self.tool = Some(ToolTask {
            generation,
            cancel,
            tool_use_id: call.id,
            tool_name: call.name,
        });
    }

    fn apply(&mut self, report: TaskReport) {
        match report {
            TaskReport::Stream { generation, update } => {
                if self.stream.as_ref().map(|t| t.generation) != Some(generation) {
                    tracing::debug!("Dropping stale stream update (generation {})", generation);
                    return;
                }
                match update {
                    StreamUpdate::Event(event) => {
                        if let Some(action) = self.interpreter.interpret(event) {
                            self.apply_action(action);
                        }
                    }
                    StreamUpdate::Failed(message) => self.fail(message),
                    StreamUpdate::Ended => self.finish_stream(),
                }
            }
            TaskReport::Tool {
                generation,
                outcome,
            } => {
                let current = self.tool.as_ref().map(|t| t.generation);
                if current != Some(generation) {
                    tracing::debug!("Dropping stale tool result (generation {})", generation);
                    return;
                }
                self.finish_tool(outcome);
            }
        }
    }

    fn apply_action(&mut self, action: Action) {
        match action {
            Action::AppendText(text) => {
                let (message_id, created) = self.conversation.append_text(&text);
                match created {
                    Some(message) => self.emit(SessionEvent::MessageAppended { message }),
                    None => self.emit(SessionEvent::TextDelta {
                        message_id,
                        delta: text,
                    }),
                }
            }
            Action::ToolCall(call) => {
                self.push(Message::tool_use(describe_tool_call(&call)));
                if self.tool.is_some() || self.conversation.pending_tool_use.is_some() {
                    tracing::warn!(
                        "Not executing {} ({}): another tool use is outstanding",
                        call.name,
                        call.id
                    );
                    self.emit(SessionEvent::ToolSkipped {
                        tool_use_id: call.id,
                        tool_name: call.name,
                    });
                    return;
                }
                self.start_tool(call);
            }
            Action::ToolCallRejected(error) => {
                self.push(Message::tool_use(describe_rejected_call(&error)));
            }
            Action::Failed(error) => {
                self.fail(format!("{} ({})", error.message, error.error_type));
            }
            Action::Finished => self.finish_stream(),
        }
    }

    fn finish_tool(&mut self, outcome: ToolOutcome) {
        let Some(task) = self.tool.take() else {
            return;
        };
        self.conversation.tool_running = false;

        let pending = PendingToolUse {
            tool_use_id: task.tool_use_id,
            tool_name: task.tool_name,
            result_text: outcome.text,
            is_error: outcome.is_error,
        };

        self.push(Message::tool_result(pending.result_text.clone()));
        self.conversation.pending_tool_use = Some(pending.clone());
        self.emit(SessionEvent::ApprovalRequested { pending });
        self.maybe_auto_approve();
    }

    fn finish_stream(&mut self) {
        let Some(task) = self.stream.take() else {
            return;
        };
        task.cancel.cancel();
        self.conversation.streaming = false;
        self.conversation.end_response();
        self.response_complete = true;
        self.emit(SessionEvent::StreamEnded { cancelled: false });
        self.maybe_auto_approve();
    }

    /// Approve on the policy's say-so, but only once the response that asked
    /// for the tool has ended cleanly
    fn maybe_auto_approve(&mut self) {
        if !self.response_complete {
            return;
        }
        let approve = match &self.conversation.pending_tool_use {
            Some(pending) => self.approval.auto_approve(pending),
            None => false,
        };
        if approve {
            self.approve();
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("Session error: {}", message);
        if let Some(task) = self.stream.take() {
            task.cancel.cancel();
        }
        self.interpreter.reset();
        self.conversation.streaming = false;
        self.conversation.end_response();
        self.response_complete = false;
        self.conversation.error_message = Some(message.clone());
        self.emit(SessionEvent::Error { message });
    }
}

/// Fetch the catalogue, issue the request and forward events until the
/// response ends or `cancel` fires.
async fn run_stream(
    generation: u64,
    mut request: ChatRequest,
    client: Arc<dyn ModelClient>,
    dispatcher: SharedDispatcher,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<TaskReport>,
) {
    let report = |update: StreamUpdate| tx.send(TaskReport::Stream { generation, update }).is_ok();

    let tools = tokio::select! {
        _ = cancel.cancelled() => return,
        tools = dispatcher.list_tools() => tools,
    };
    request.tools = match tools {
        Ok(tools) => tools,
        Err(e) => {
            report(StreamUpdate::Failed(format!("Failed to fetch tools: {}", e)));
            return;
        }
    };

    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = client.stream(&request) => opened,
    };
    let mut events = match opened {
        Ok(events) => events,
        Err(e) => {
            report(StreamUpdate::Failed(e.to_string()));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = events.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                let terminal = event.is_terminal();
                if !report(StreamUpdate::Event(event)) || terminal {
                    return;
                }
            }
            Some(Err(e)) => {
                report(StreamUpdate::Failed(e.to_string()));
                return;
            }
            None => break,
        }
    }

    report(StreamUpdate::Ended);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use crate::backend::BackendError;
    use crate::conversation::CANCELLED_MARKER;
    use crate::dispatch::{ToolDispatcher, ToolInput};
    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;
    use relay_ai::{ApiError, ApiMessage, ApiRole, BlockDelta, BlockStart, Role, StreamEventStream, ToolDescriptor};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Notify;

    enum Script {
        /// Yield these events, then end
        Events(Vec<StreamEvent>),
        /// Yield these events, then never finish
        Hang(Vec<StreamEvent>),
        /// Yield the first events, wait for the gate, then yield the rest
        Gated(Vec<StreamEvent>, Arc<Notify>, Vec<StreamEvent>),
        /// Fail to open the stream
        Refuse(String),
    }

    /// A model client that replays canned responses.
    struct ScriptedClient {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream(&self, request: &ChatRequest) -> relay_ai::Result<StreamEventStream> {
            self.requests.lock().push(request.clone());
            let script = self
                .scripts
                .lock()
                .pop_front()
                .unwrap_or_else(|| Script::Events(text_response("done")));

            match script {
                Script::Events(events) => Ok(Box::pin(stream::iter(
                    events.into_iter().map(Ok::<_, relay_ai::Error>),
                ))),
                Script::Hang(events) => Ok(Box::pin(
                    stream::iter(events.into_iter().map(Ok::<_, relay_ai::Error>))
                        .chain(stream::pending()),
                )),
                Script::Gated(first, gate, rest) => {
                    let wait = stream::once(async move { gate.notified().await })
                        .filter_map(|()| async { None::<relay_ai::Result<StreamEvent>> });
                    Ok(Box::pin(
                        stream::iter(first.into_iter().map(Ok::<_, relay_ai::Error>))
                            .chain(wait)
                            .chain(stream::iter(rest.into_iter().map(Ok::<_, relay_ai::Error>))),
                    ))
                }
                Script::Refuse(message) => Err(relay_ai::Error::Sse(message)),
            }
        }
    }

    /// A dispatcher that records every call.
    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, ToolInput)>>,
        reply: ToolOutcome,
        hang: bool,
        offline: bool,
        /// Hold the reply until notified
        gate: Option<Arc<Notify>>,
    }

    impl RecordingDispatcher {
        fn replying(reply: ToolOutcome) -> Self {
            Self {
                calls: Mutex::new(vec![]),
                reply,
                hang: false,
                offline: false,
                gate: None,
            }
        }

        fn gated(reply: ToolOutcome, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::replying(reply)
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl ToolDispatcher for RecordingDispatcher {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            if self.offline {
                return Err(BackendError::Unavailable("offline".into()).into());
            }
            Ok(vec![ToolDescriptor::new("LS", Some("List a directory".into()))])
        }

        async fn invoke(&self, name: &str, input: ToolInput, cancel: CancellationToken) -> ToolOutcome {
            self.calls.lock().push((name.to_string(), input));
            if self.hang {
                cancel.cancelled().await;
                return ToolOutcome::cancelled();
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.clone()
        }
    }

    fn text_response(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart,
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::text(),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::text(text),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageDelta {
                text: None,
                stop_reason: Some("end_turn".into()),
            },
            StreamEvent::MessageStop,
        ]
    }

    fn tool_block(index: usize, id: &str, name: &str, fragments: &[&str]) -> Vec<StreamEvent> {
        let mut events = vec![StreamEvent::ContentBlockStart {
            index,
            block: BlockStart::tool_use(id, name),
        }];
        for fragment in fragments {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::input_json(*fragment),
            });
        }
        events.push(StreamEvent::ContentBlockStop { index });
        events
    }

    fn tool_response(id: &str, name: &str, fragments: &[&str]) -> Vec<StreamEvent> {
        let mut events = vec![StreamEvent::MessageStart];
        events.extend(tool_block(0, id, name, fragments));
        events.push(StreamEvent::MessageStop);
        events
    }

    fn make_session(
        scripts: Vec<Script>,
        dispatcher: RecordingDispatcher,
    ) -> (Session, Arc<ScriptedClient>, Arc<RecordingDispatcher>) {
        let client = Arc::new(ScriptedClient {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(vec![]),
        });
        let dispatcher = Arc::new(dispatcher);
        let mut config = SessionConfig::new(Model::anthropic("test"));
        config.system_prompt = Some("test".into());
        let session = Session::new(config, client.clone(), dispatcher.clone());
        (session, client, dispatcher)
    }

    async fn pump_until(session: &mut Session, done: impl Fn(&Session) -> bool) {
        for _ in 0..50 {
            if done(session) {
                return;
            }
            assert!(session.pump().await, "session went idle before condition was met");
        }
        panic!("condition not met");
    }

    fn last_content(session: &Session) -> &str {
        session
            .messages()
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    fn list_files_session(reply: ToolOutcome) -> (Session, Arc<ScriptedClient>, Arc<RecordingDispatcher>) {
        make_session(
            vec![
                Script::Events(tool_response("t1", "LS", &[r#"{"path":""#, r#""/repo"}"#])),
                Script::Events(text_response("Found 2 files.")),
            ],
            RecordingDispatcher::replying(reply),
        )
    }

    #[tokio::test]
    async fn test_tool_call_is_dispatched_and_awaits_approval() {
        let (mut session, client, dispatcher) = list_files_session(ToolOutcome::text("a.rs\nb.rs"));

        session.submit("list files").unwrap();
        assert_eq!(session.phase(), Phase::Streaming);
        session.run_until_settled().await;

        let calls = dispatcher.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "LS");
        assert_eq!(
            serde_json::Value::Object(calls[0].1.clone()),
            serde_json::json!({"path": "/repo"})
        );

        assert_eq!(session.phase(), Phase::ToolsPending);
        assert!(session.waiting_for_approval());
        assert!(!session.is_streaming());
        let pending = session.pending_tool_use().unwrap();
        assert_eq!(pending.tool_use_id, "t1");
        assert_eq!(pending.tool_name, "LS");
        assert_eq!(pending.result_text, "a.rs\nb.rs");
        assert!(!pending.is_error);

        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::ToolUse, Role::ToolResult]
        );
        assert_eq!(session.messages()[2].content, "Tool: LS\nPath: /repo");

        let requests = client.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages,
            vec![ApiMessage {
                role: ApiRole::User,
                content: "list files".into(),
            }]
        );
        assert_eq!(requests[0].tools[0].name, "LS");
        assert_eq!(requests[0].system_prompt.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_approve_sends_envelope_and_continues() {
        let (mut session, client, _) = list_files_session(ToolOutcome::text("a.rs\nb.rs"));
        session.submit("list files").unwrap();
        session.run_until_settled().await;

        let mut rx = session.subscribe();
        assert!(session.approve());
        assert!(!session.waiting_for_approval());
        assert_eq!(session.phase(), Phase::Streaming);
        match rx.try_recv().unwrap() {
            SessionEvent::ResultApproved { message } => {
                assert_eq!(message.role, Role::Assistant);
                assert!(message.content.starts_with(r#"{"type":"tool_result""#));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        session.run_until_settled().await;

        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(last_content(&session), "Found 2 files.");

        let requests = client.requests.lock();
        assert_eq!(requests.len(), 2);
        let continuation = &requests[1].messages;
        assert_eq!(continuation.len(), 2);
        assert_eq!(continuation[1].role, ApiRole::Assistant);
        assert!(continuation[1].content.starts_with("Tool: LS\nPath: /repo\n\na.rs\nb.rs\n\n"));
        assert!(continuation[1].content.ends_with(
            r#"{"type":"tool_result","tool_use_id":"t1","content":"a.rs\nb.rs","is_error":false}"#
        ));
    }

    #[tokio::test]
    async fn test_failed_tool_still_needs_approval() {
        let (mut session, _, _) =
            list_files_session(ToolOutcome::failed("No result from LS: server crashed"));
        session.submit("list files").unwrap();
        session.run_until_settled().await;

        let pending = session.pending_tool_use().unwrap();
        assert!(pending.is_error);
        assert!(pending.result_text.starts_with("Error:"));
        assert_eq!(session.phase(), Phase::ToolsPending);
    }

    #[tokio::test]
    async fn test_nothing_pending_is_a_no_op() {
        let (mut session, client, _) = make_session(vec![], RecordingDispatcher::replying(ToolOutcome::text("")));
        assert!(!session.approve());
        assert!(!session.cancel_tool());
        assert!(!session.cancel_stream());
        assert!(!session.pump().await);
        assert!(session.messages().is_empty());
        assert!(client.requests.lock().is_empty());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let (mut session, _, _) = make_session(vec![], RecordingDispatcher::replying(ToolOutcome::text("")));
        assert!(matches!(session.submit("  \n"), Err(Error::EmptyInput)));
        assert!(session.messages().is_empty());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let (mut session, _, _) = make_session(
            vec![Script::Hang(vec![
                StreamEvent::MessageStart,
                StreamEvent::ContentBlockStart {
                    index: 0,
                    block: BlockStart::text(),
                },
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::text("Partial"),
                },
            ])],
            RecordingDispatcher::replying(ToolOutcome::text("")),
        );

        session.submit("hi").unwrap();
        pump_until(&mut session, |s| last_content(s) == "Partial").await;

        assert!(session.cancel_stream());
        assert!(!session.is_streaming());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(
            last_content(&session),
            format!("Partial\n\n{}", CANCELLED_MARKER)
        );
        assert!(session.error_message().is_none());
        assert!(!session.pump().await);
    }

    #[tokio::test]
    async fn test_new_stream_replaces_live_one() {
        let (mut session, client, _) = make_session(
            vec![
                Script::Hang(vec![StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::text("Partial"),
                }]),
                Script::Events(text_response("ok")),
            ],
            RecordingDispatcher::replying(ToolOutcome::text("")),
        );

        session.submit("first").unwrap();
        pump_until(&mut session, |s| last_content(s) == "Partial").await;

        session.submit("second").unwrap();
        assert!(session.is_streaming());
        session.run_until_settled().await;

        let contents: Vec<&str> = session.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "first",
                "Partial\n\n[Response cancelled by user]",
                "second",
                "ok"
            ]
        );
        assert_eq!(client.requests.lock().len(), 2);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_tool_block_without_json_dispatches_empty_object() {
        let (mut session, _, dispatcher) = make_session(
            vec![Script::Events(tool_response("t2", "list_roots", &[]))],
            RecordingDispatcher::replying(ToolOutcome::text("/repo")),
        );
        session.submit("roots?").unwrap();
        session.run_until_settled().await;

        let calls = dispatcher.calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_bad_tool_input_is_logged_not_dispatched() {
        let (mut session, _, dispatcher) = make_session(
            vec![Script::Events(tool_response("t3", "view", &[r#"{"path": "#]))],
            RecordingDispatcher::replying(ToolOutcome::text("")),
        );
        session.submit("show it").unwrap();
        session.run_until_settled().await;

        assert_eq!(dispatcher.call_count(), 0);
        assert!(!session.waiting_for_approval());
        let entry = session
            .messages()
            .iter()
            .find(|m| m.role == Role::ToolUse)
            .unwrap();
        assert!(entry.content.starts_with("Tool: view\nError: "));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_at_most_one_tool_use() {
        let mut events = vec![StreamEvent::MessageStart];
        events.extend(tool_block(0, "t1", "LS", &[r#"{"path":"/a"}"#]));
        events.extend(tool_block(1, "t2", "LS", &[r#"{"path":"/b"}"#]));
        events.push(StreamEvent::MessageStop);

        let (mut session, _, dispatcher) = make_session(
            vec![Script::Events(events)],
            RecordingDispatcher::replying(ToolOutcome::text("ok")),
        );
        let mut rx = session.subscribe();

        session.submit("list both").unwrap();
        session.run_until_settled().await;

        assert_eq!(dispatcher.call_count(), 1);
        assert_eq!(session.pending_tool_use().unwrap().tool_use_id, "t1");
        let tool_uses = session
            .messages()
            .iter()
            .filter(|m| m.role == Role::ToolUse)
            .count();
        assert_eq!(tool_uses, 2);

        let mut skipped = vec![];
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::ToolSkipped { tool_use_id, .. } = event {
                skipped.push(tool_use_id);
            }
        }
        assert_eq!(skipped, vec!["t2".to_string()]);
    }

    #[tokio::test]
    async fn test_error_event_short_circuits() {
        let (mut session, _, _) = make_session(
            vec![Script::Events(vec![
                StreamEvent::MessageStart,
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::text("Hel"),
                },
                StreamEvent::Error {
                    error: ApiError {
                        error_type: "overloaded_error".into(),
                        message: "Overloaded".into(),
                    },
                },
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::text("lo"),
                },
            ])],
            RecordingDispatcher::replying(ToolOutcome::text("")),
        );
        session.submit("hi").unwrap();
        session.run_until_settled().await;

        assert_eq!(last_content(&session), "Hel");
        assert_eq!(session.error_message(), Some("Overloaded (overloaded_error)"));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_catalogue_failure_is_visible() {
        let mut dispatcher = RecordingDispatcher::replying(ToolOutcome::text(""));
        dispatcher.offline = true;
        let (mut session, client, _) = make_session(vec![], dispatcher);
        let mut rx = session.subscribe();

        session.submit("hi").unwrap();
        session.run_until_settled().await;

        assert!(session
            .error_message()
            .unwrap()
            .starts_with("Failed to fetch tools"));
        assert!(client.requests.lock().is_empty());
        assert_eq!(session.phase(), Phase::Idle);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event, SessionEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_transport_failure_is_visible() {
        let (mut session, _, _) = make_session(
            vec![Script::Refuse("connection refused".into())],
            RecordingDispatcher::replying(ToolOutcome::text("")),
        );
        session.submit("hi").unwrap();
        session.run_until_settled().await;

        assert!(session.error_message().unwrap().contains("connection refused"));
        assert!(!session.is_streaming());

        // The next cycle clears the error
        session.submit("again").unwrap();
        assert!(session.error_message().is_none());
        session.run_until_settled().await;
        assert_eq!(last_content(&session), "done");
    }

    #[tokio::test]
    async fn test_cancel_executing_tool() {
        let mut dispatcher = RecordingDispatcher::replying(ToolOutcome::text(""));
        dispatcher.hang = true;
        let (mut session, _, _) = make_session(
            vec![Script::Events(tool_response("t1", "LS", &["{}"]))],
            dispatcher,
        );

        session.submit("list").unwrap();
        pump_until(&mut session, |s| !s.is_streaming()).await;
        assert_eq!(session.phase(), Phase::ToolsPending);
        assert!(!session.waiting_for_approval());

        assert!(session.cancel_tool());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.pump().await);
        assert!(!session.messages().iter().any(|m| m.role == Role::ToolResult));
    }

    #[tokio::test]
    async fn test_submit_cancels_pending_tool_use() {
        let (mut session, _, _) = list_files_session(ToolOutcome::text("a.rs"));
        session.submit("list files").unwrap();
        session.run_until_settled().await;
        assert!(session.waiting_for_approval());

        session.submit("never mind").unwrap();
        assert!(!session.waiting_for_approval());
        session.run_until_settled().await;
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(last_content(&session), "Found 2 files.");
    }

    #[tokio::test]
    async fn test_auto_approve_continues_after_stream_ends() {
        let (session, client, _) = list_files_session(ToolOutcome::text("a.rs\nb.rs"));
        let mut session = session.with_approval(AutoApprove);

        session.submit("list files").unwrap();
        session.run_until_settled().await;

        assert_eq!(client.requests.lock().len(), 2);
        assert!(!session.waiting_for_approval());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(last_content(&session), "Found 2 files.");
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (mut session, _, _) = list_files_session(ToolOutcome::text("a.rs"));
        let mut rx = session.subscribe();
        session.submit("list files").unwrap();
        session.run_until_settled().await;

        let mut kinds = vec![];
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                SessionEvent::MessageAppended { message } => format!("append:{}", message.role.as_str()),
                SessionEvent::StreamStarted => "stream_started".into(),
                SessionEvent::StreamEnded { .. } => "stream_ended".into(),
                SessionEvent::ToolStarted { .. } => "tool_started".into(),
                SessionEvent::ApprovalRequested { .. } => "approval".into(),
                other => format!("{:?}", other),
            });
        }

        assert_eq!(kinds[0], "append:user");
        assert_eq!(kinds[1], "append:assistant");
        assert_eq!(kinds[2], "stream_started");
        assert!(kinds.contains(&"tool_started".to_string()));
        assert!(kinds.contains(&"stream_ended".to_string()));
        assert!(kinds.contains(&"approval".to_string()));
    }

    fn overloaded() -> StreamEvent {
        StreamEvent::Error {
            error: ApiError {
                error_type: "overloaded_error".into(),
                message: "Overloaded".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_auto_approve_skipped_after_cancel() {
        let gate = Arc::new(Notify::new());
        let mut events = vec![StreamEvent::MessageStart];
        events.extend(tool_block(0, "t1", "LS", &["{}"]));
        let (session, client, _) = make_session(
            vec![Script::Hang(events)],
            RecordingDispatcher::gated(ToolOutcome::text("a.rs"), gate.clone()),
        );
        let mut session = session.with_approval(AutoApprove);

        session.submit("list").unwrap();
        pump_until(&mut session, |s| s.state().tool_running).await;
        assert!(session.cancel_stream());

        gate.notify_one();
        session.run_until_settled().await;

        assert_eq!(client.requests.lock().len(), 1);
        assert!(session.waiting_for_approval());
        assert_eq!(session.phase(), Phase::ToolsPending);
    }

    #[tokio::test]
    async fn test_auto_approve_skipped_after_stream_error() {
        let gate = Arc::new(Notify::new());
        let mut events = vec![StreamEvent::MessageStart];
        events.extend(tool_block(0, "t1", "LS", &["{}"]));
        events.push(overloaded());
        let (session, client, _) = make_session(
            vec![Script::Events(events)],
            RecordingDispatcher::gated(ToolOutcome::text("a.rs"), gate.clone()),
        );
        let mut session = session.with_approval(AutoApprove);

        session.submit("list").unwrap();
        pump_until(&mut session, |s| s.error_message().is_some()).await;

        gate.notify_one();
        session.run_until_settled().await;

        assert_eq!(client.requests.lock().len(), 1);
        assert_eq!(session.error_message(), Some("Overloaded (overloaded_error)"));
        assert!(session.waiting_for_approval());
    }

    #[tokio::test]
    async fn test_text_after_tool_result_keeps_streaming() {
        let gate = Arc::new(Notify::new());
        let mut first = vec![
            StreamEvent::MessageStart,
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::text(),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::text("Checking."),
            },
            StreamEvent::ContentBlockStop { index: 0 },
        ];
        first.extend(tool_block(1, "t1", "LS", &[r#"{"path":"/repo"}"#]));
        let rest = vec![
            StreamEvent::ContentBlockStart {
                index: 2,
                block: BlockStart::text(),
            },
            StreamEvent::ContentBlockDelta {
                index: 2,
                delta: BlockDelta::text("Still here."),
            },
            StreamEvent::ContentBlockStop { index: 2 },
            StreamEvent::MessageStop,
        ];
        let (mut session, client, _) = make_session(
            vec![Script::Gated(first, gate.clone(), rest)],
            RecordingDispatcher::replying(ToolOutcome::text("a.rs")),
        );

        session.submit("list").unwrap();
        pump_until(&mut session, |s| s.waiting_for_approval()).await;
        assert!(session.is_streaming());
        assert_eq!(session.phase(), Phase::Streaming);
        assert_eq!(session.pending_tool_use().unwrap().tool_use_id, "t1");

        gate.notify_one();
        session.run_until_settled().await;

        assert_eq!(session.phase(), Phase::ToolsPending);
        assert!(session.waiting_for_approval());
        let log: Vec<(Role, &str)> = session
            .messages()
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            log,
            vec![
                (Role::User, "list"),
                (Role::Assistant, "Checking."),
                (Role::ToolUse, "Tool: LS\nPath: /repo"),
                (Role::ToolResult, "a.rs"),
                (Role::Assistant, "Still here."),
            ]
        );
        assert_eq!(client.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_tool_drops_queued_result() {
        let gate = Arc::new(Notify::new());
        let mut first = vec![StreamEvent::MessageStart];
        first.extend(tool_block(0, "t1", "LS", &["{}"]));
        let (mut session, _, dispatcher) = make_session(
            vec![Script::Gated(first, gate.clone(), vec![StreamEvent::MessageStop])],
            RecordingDispatcher::replying(ToolOutcome::text("a.rs")),
        );

        session.submit("list").unwrap();
        pump_until(&mut session, |s| s.state().tool_running).await;

        // Let the tool finish and queue its report without applying it
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.call_count(), 1);
        assert!(session.cancel_tool());

        gate.notify_one();
        session.run_until_settled().await;

        assert!(!session.waiting_for_approval());
        assert!(session.pending_tool_use().is_none());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.messages().iter().any(|m| m.role == Role::ToolResult));
    }
}
