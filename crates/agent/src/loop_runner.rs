//! The tool-use conversation loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use local_llm_config::ChatOptions;
use local_llm_core::error::ConversationError;
use local_llm_core::event::{DomainEvent, EventBus};
use local_llm_core::message::{ContentRecord, ConversationHistory, Role, ToolCallRequest};
use local_llm_core::provider::{
    ChatRequest, ContentPart, DeltaEvent, Provider, ResponseFormat, StreamOptions, ToolSpec,
    WireContent, WireMessage,
};
use local_llm_core::tool::ToolRegistry;
use local_llm_providers::{
    AssistantTurn, StreamTransformer, encode_attachments, format_response_format, to_wire_messages,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A named JSON schema the final answer must follow.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub structure: Option<StructuredOutput>,

    /// Upper bound on the wall-clock time of the whole run.
    pub deadline: Option<Duration>,
}

impl RunOptions {
    pub fn with_structure(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.structure = Some(StructuredOutput {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model answered without requesting more tools.
    Done { iterations: u32 },

    /// The model still wanted tools after the last allowed provider call.
    IterationCapReached { iterations: u32 },

    /// Tool calls were requested but no registry is attached to run them.
    AwaitingToolResults {
        iterations: u32,
        pending: Vec<ToolCallRequest>,
    },
}

impl RunOutcome {
    pub fn iterations(&self) -> u32 {
        match self {
            Self::Done { iterations }
            | Self::IterationCapReached { iterations }
            | Self::AwaitingToolResults { iterations, .. } => *iterations,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Done { .. } => "done",
            Self::IterationCapReached { .. } => "iteration_cap_reached",
            Self::AwaitingToolResults { .. } => "awaiting_tool_results",
        }
    }
}

/// Drives one conversation turn: provider call, streamed answer, tool calls,
/// and back again until the model stops asking for tools.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    options: ChatOptions,
    tools: Option<Arc<ToolRegistry>>,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, options: ChatOptions) -> Self {
        Self {
            provider,
            options,
            tools: None,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Attach the tools the model may call.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the maximum number of provider calls per run.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.options.max_tool_iterations = max;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run until the model answers, appending every new record to `history`.
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        options: &RunOptions,
    ) -> Result<RunOutcome, ConversationError> {
        self.run_inner(history, options, None).await
    }

    /// Like [`run`](Self::run), forwarding every delta to `sink` as it arrives.
    ///
    /// A closed `sink` does not stop the run.
    pub async fn run_streaming(
        &self,
        history: &mut ConversationHistory,
        options: &RunOptions,
        sink: mpsc::Sender<DeltaEvent>,
    ) -> Result<RunOutcome, ConversationError> {
        self.run_inner(history, options, Some(&sink)).await
    }

    async fn run_inner(
        &self,
        history: &mut ConversationHistory,
        options: &RunOptions,
        sink: Option<&mpsc::Sender<DeltaEvent>>,
    ) -> Result<RunOutcome, ConversationError> {
        let conversation_id = history.id.to_string();
        let drive = self.drive(history, options, sink);

        let outcome = match options.deadline {
            Some(limit) => match tokio::time::timeout(limit, drive).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(conversation_id = %conversation_id, ?limit, "Conversation deadline exceeded");
                    Err(ConversationError::DeadlineExceeded(limit))
                }
            },
            None => drive.await,
        }?;

        info!(
            conversation_id = %conversation_id,
            iterations = outcome.iterations(),
            outcome = outcome.label(),
            "Conversation run finished"
        );
        self.event_bus.publish(DomainEvent::RunFinished {
            conversation_id,
            iterations: outcome.iterations(),
            outcome: outcome.label().into(),
            timestamp: chrono::Utc::now(),
        });

        Ok(outcome)
    }

    async fn drive(
        &self,
        history: &mut ConversationHistory,
        options: &RunOptions,
        sink: Option<&mpsc::Sender<DeltaEvent>>,
    ) -> Result<RunOutcome, ConversationError> {
        info!(
            conversation_id = %history.id,
            records = history.len(),
            "Running conversation"
        );

        let mut messages = build_messages(history).await?;
        let tools = self.tool_specs();
        let response_format = options
            .structure
            .as_ref()
            .map(|s| format_response_format(&s.name, s.schema.clone()));

        let max_iterations = self.options.max_tool_iterations;
        let mut iterations = 0u32;

        loop {
            if iterations >= max_iterations {
                warn!(
                    conversation_id = %history.id,
                    iterations,
                    "Max tool iterations reached"
                );
                return Ok(RunOutcome::IterationCapReached { iterations });
            }
            iterations += 1;

            debug!(
                conversation_id = %history.id,
                iteration = iterations,
                messages = messages.len(),
                "Conversation loop iteration"
            );

            let request = self.request(
                history,
                messages.clone(),
                tools.clone(),
                response_format.clone(),
            );

            let chunks = self
                .provider
                .stream_chat(request)
                .await
                .map_err(|e| self.failure(history, e.into()))?;

            let mut transformer =
                StreamTransformer::new(chunks).with_event_bus(self.event_bus.clone());
            let mut turn = AssistantTurn::new();

            while let Some(event) = transformer.next_event().await {
                let event = event.map_err(|e| self.failure(history, e.into()))?;
                if let Some(sink) = sink {
                    if sink.send(event.clone()).await.is_err() {
                        debug!("Delta receiver closed");
                    }
                }
                turn.push(event);
            }

            let Some(record) = turn.finish() else {
                debug!(conversation_id = %history.id, "Model turn produced nothing");
                return Ok(RunOutcome::Done { iterations });
            };
            let pending = record.tool_calls().to_vec();
            let appended_from = history.len();
            history.push(record);

            if pending.is_empty() {
                return Ok(RunOutcome::Done { iterations });
            }

            let Some(registry) = &self.tools else {
                debug!(count = pending.len(), "Tool calls left for the caller");
                return Ok(RunOutcome::AwaitingToolResults {
                    iterations,
                    pending,
                });
            };

            self.execute_tool_calls(registry, history).await;
            messages.extend(to_wire_messages(&history.records()[appended_from..]));
        }
    }

    fn request(
        &self,
        history: &ConversationHistory,
        messages: Vec<WireMessage>,
        tools: Option<Vec<ToolSpec>>,
        response_format: Option<ResponseFormat>,
    ) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages,
            tools,
            temperature: self.options.temperature,
            top_p: self.options.top_p,
            max_tokens: self.options.max_tokens,
            user: Some(history.id.to_string()),
            response_format,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn tool_specs(&self) -> Option<Vec<ToolSpec>> {
        let registry = self.tools.as_ref().filter(|r| !r.is_empty())?;
        Some(registry.definitions().iter().map(ToolSpec::from).collect())
    }

    /// Run every call of the last assistant record, in order, appending one
    /// result per call. Failures are reported back to the model as data.
    async fn execute_tool_calls(&self, registry: &ToolRegistry, history: &mut ConversationHistory) {
        let calls: Vec<ToolCallRequest> = match history.last() {
            Some(record @ ContentRecord::Assistant { .. }) => record.tool_calls().to_vec(),
            _ => return,
        };
        if calls.is_empty() {
            return;
        }

        debug!(tool_count = calls.len(), "Executing tool calls");

        for call in calls {
            let start = Instant::now();
            let result = registry.execute(&call).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: result.is_ok(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            let value = match result {
                Ok(value) => {
                    debug!(tool = %call.name, duration_ms, "Tool call succeeded");
                    value
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    serde_json::json!({ "error": e.kind(), "error_text": e.to_string() })
                }
            };

            history.push(ContentRecord::tool_result(call.id, call.name, value));
        }
    }

    fn failure(&self, history: &ConversationHistory, err: ConversationError) -> ConversationError {
        match &err {
            ConversationError::RateLimited => error!("Rate limited by Local LLM"),
            ConversationError::QuotaExceeded => error!("Insufficient quota for Local LLM"),
            ConversationError::MalformedToolArguments { index, reason } => {
                error!(index, reason = %reason, "Model produced malformed tool arguments")
            }
            other => error!(error = %other, "Error talking to Local LLM"),
        }

        self.event_bus.publish(DomainEvent::ProviderFailed {
            conversation_id: history.id.to_string(),
            error_message: err.to_string(),
            timestamp: chrono::Utc::now(),
        });
        err
    }
}

/// Convert the history into request messages, inlining the attachments of a
/// trailing user record as content parts after its text.
async fn build_messages(
    history: &ConversationHistory,
) -> Result<Vec<WireMessage>, ConversationError> {
    let mut messages = to_wire_messages(history.records());

    let Some(ContentRecord::User { text, attachments }) = history.last() else {
        return Ok(messages);
    };
    if attachments.is_empty() {
        return Ok(messages);
    }

    let files = encode_attachments(attachments.clone()).await?;
    let mut parts = Vec::with_capacity(files.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.clone() });
    }
    parts.extend(files);
    let content = Some(WireContent::Parts(parts));

    match messages.last_mut() {
        Some(last) if !text.is_empty() && last.role == Role::User => last.content = content,
        _ => messages.push(WireMessage {
            role: Role::User,
            content,
            tool_calls: None,
            tool_call_id: None,
        }),
    }

    Ok(messages)
}
