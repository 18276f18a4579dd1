//! Raw chat-completion chunks to semantic [`DeltaEvent`]s.
//!
//! Text deltas pass straight through. Tool-call fragments are keyed by their
//! stream index and held until the model signals `finish_reason: "tool_calls"`,
//! at which point every call of the turn is emitted at once, sorted by index.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use local_llm_core::error::{ConversationError, ProviderError};
use local_llm_core::event::{DomainEvent, EventBus};
use local_llm_core::message::ToolCallRequest;
use local_llm_core::provider::{ChatChunk, ChunkStream, DeltaEvent, ToolCallFragment};
use thiserror::Error;
use tracing::{debug, warn};

const TOOL_CALLS_FINISH: &str = "tool_calls";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Malformed arguments for tool call {index}: {reason}")]
    MalformedToolArguments { index: u32, reason: String },
}

impl From<StreamError> for ConversationError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Provider(e) => e.into(),
            StreamError::MalformedToolArguments { index, reason } => {
                Self::MalformedToolArguments { index, reason }
            }
        }
    }
}

/// A tool call still being assembled from fragments.
#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Merges tool-call fragments by stream index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment in. `id` and `name` only fill slots that are still
    /// empty; argument text is always appended.
    pub fn absorb(&mut self, fragment: ToolCallFragment) {
        let partial = self.partials.entry(fragment.index).or_default();

        if partial.id.is_none() {
            partial.id = fragment.id.filter(|id| !id.is_empty());
        }

        if let Some(function) = fragment.function {
            if partial.name.is_none() {
                partial.name = function.name.filter(|n| !n.is_empty());
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }

    /// Resolve every partial call in ascending index order and reset.
    ///
    /// An empty argument buffer means `{}`. Arguments that are not a JSON
    /// object fail the whole batch.
    pub fn finalize(&mut self) -> Result<Vec<ToolCallRequest>, StreamError> {
        let partials = std::mem::take(&mut self.partials);
        let mut calls = Vec::with_capacity(partials.len());

        for (index, partial) in partials {
            let Some(name) = partial.name else {
                warn!(index, "Dropping tool call without a function name");
                continue;
            };

            let args = parse_arguments(index, &partial.arguments)?;

            let id = partial.id.unwrap_or_else(|| {
                warn!(index, tool = %name, "Tool call arrived without an id");
                format!("call_{index}")
            });

            calls.push(ToolCallRequest { id, name, args });
        }

        Ok(calls)
    }

    /// Throw away all partial calls, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let count = self.partials.len();
        self.partials.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

fn parse_arguments(
    index: u32,
    buffer: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, StreamError> {
    if buffer.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }

    match serde_json::from_str::<serde_json::Value>(buffer) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(StreamError::MalformedToolArguments {
            index,
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(StreamError::MalformedToolArguments {
            index,
            reason: e.to_string(),
        }),
    }
}

/// Lazily turns one provider chunk stream into delta events.
///
/// Single pass: once the underlying stream ends or fails, the transformer
/// yields `None` forever.
pub struct StreamTransformer {
    chunks: ChunkStream,
    accumulator: ToolCallAccumulator,
    pending: VecDeque<DeltaEvent>,
    failure: Option<StreamError>,
    events: Option<Arc<EventBus>>,
    finished: bool,
}

impl StreamTransformer {
    pub fn new(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            accumulator: ToolCallAccumulator::new(),
            pending: VecDeque::new(),
            failure: None,
            events: None,
            finished: false,
        }
    }

    /// Publish token usage to this bus as it is reported.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// The next event, or `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<Result<DeltaEvent, StreamError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.absorb_chunk(chunk) {
                        self.fail(e);
                    }
                }
                Some(Err(e)) => self.fail(e.into()),
                None => self.finish(),
            }
        }
    }

    /// Consume the transformer as a `Stream`.
    pub fn into_stream(self) -> BoxStream<'static, Result<DeltaEvent, StreamError>> {
        futures::stream::unfold(self, |mut transformer| async move {
            transformer
                .next_event()
                .await
                .map(|event| (event, transformer))
        })
        .boxed()
    }

    fn absorb_chunk(&mut self, chunk: ChatChunk) -> Result<(), StreamError> {
        if let Some(usage) = chunk.usage {
            debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "Token usage reported"
            );
            if let Some(events) = &self.events {
                events.publish(DomainEvent::UsageReported {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            self.pending.push_back(DeltaEvent::Content { text });
        }

        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            self.accumulator.absorb(fragment);
        }

        if choice.finish_reason.as_deref() == Some(TOOL_CALLS_FINISH) {
            let calls = self.accumulator.finalize()?;
            if !calls.is_empty() {
                debug!(count = calls.len(), "Tool calls resolved");
                self.pending.push_back(DeltaEvent::ToolCalls { calls });
            }
        }

        Ok(())
    }

    fn fail(&mut self, err: StreamError) {
        self.failure = Some(err);
        self.finish();
    }

    fn finish(&mut self) {
        self.finished = true;
        let discarded = self.accumulator.discard();
        if discarded > 0 {
            warn!(discarded, "Stream ended with unfinished tool calls; discarding them");
        }
    }
}

impl Drop for StreamTransformer {
    fn drop(&mut self) {
        if !self.accumulator.is_empty() {
            warn!(
                discarded = self.accumulator.len(),
                "Stream dropped with unfinished tool calls; discarding them"
            );
        }
    }
}
