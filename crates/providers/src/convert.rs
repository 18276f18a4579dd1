//! Conversion between the neutral conversation history and wire messages.

use local_llm_core::message::{ContentRecord, Role, ToolCallRequest};
use local_llm_core::provider::{DeltaEvent, WireContent, WireFunction, WireMessage, WireToolCall};

/// Convert history records to chat-completions messages, one record at a time,
/// in order. Records are never merged or reordered; an assistant record with
/// both text and tool calls yields a text message followed by a tool-call one.
pub fn to_wire_messages(records: &[ContentRecord]) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(records.len());

    for record in records {
        if let ContentRecord::ToolResult {
            tool_call_id,
            result,
            ..
        } = record
        {
            messages.push(WireMessage {
                role: Role::Tool,
                content: Some(WireContent::Text(result.to_string())),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            });
            continue;
        }

        if let Some(text) = record.text().filter(|t| !t.is_empty()) {
            messages.push(WireMessage::text(record.role(), text));
        }

        let calls = record.tool_calls();
        if !calls.is_empty() {
            messages.push(WireMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(calls.iter().map(to_wire_tool_call).collect()),
                tool_call_id: None,
            });
        }
    }

    messages
}

fn to_wire_tool_call(call: &ToolCallRequest) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        kind: "function".into(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: serde_json::Value::Object(call.args.clone()).to_string(),
        },
    }
}

/// Recover `(tool_call_id, result)` from a tool-role wire message.
///
/// Returns `None` for any other message, or when the content is not JSON.
pub fn tool_result_from_wire(message: &WireMessage) -> Option<(String, serde_json::Value)> {
    if message.role != Role::Tool {
        return None;
    }
    let id = message.tool_call_id.clone()?;
    let WireContent::Text(text) = message.content.as_ref()? else {
        return None;
    };
    let result = serde_json::from_str(text).ok()?;
    Some((id, result))
}

/// Folds the delta events of one provider turn into a single assistant record.
#[derive(Debug, Default)]
pub struct AssistantTurn {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

impl AssistantTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DeltaEvent) {
        match event {
            DeltaEvent::Content { text } => self.text.push_str(&text),
            DeltaEvent::ToolCalls { calls } => self.tool_calls.extend(calls),
        }
    }

    /// The record to append, or `None` if the model produced nothing.
    pub fn finish(self) -> Option<ContentRecord> {
        if self.text.is_empty() && self.tool_calls.is_empty() {
            return None;
        }
        Some(ContentRecord::Assistant {
            text: (!self.text.is_empty()).then_some(self.text),
            tool_calls: (!self.tool_calls.is_empty()).then_some(self.tool_calls),
        })
    }
}
