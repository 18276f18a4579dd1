//! Conversation history domain types.
//!
//! A [`ConversationHistory`] is the ordered, append-only log of
//! [`ContentRecord`]s for one session. The orchestrator appends to it after
//! every provider turn; callers append between runs (new user input, tool
//! results they executed themselves).

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions. Developer-role input is folded in here.
    #[serde(alias = "developer")]
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within one assistant turn; echoed back as `tool_call_id`.
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Parsed arguments
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// A file attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub path: PathBuf,

    /// Declared MIME type; inferred from the file name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl AttachmentRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentRecord {
    System {
        text: String,
    },
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentRef>,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCallRequest>>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },
}

impl ContentRecord {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// Developer instructions; the wire format has no stable developer role,
    /// so these are stored and sent as system content.
    pub fn developer(text: impl Into<String>) -> Self {
        Self::system(text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self::User {
            text: text.into(),
            attachments,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: Some(text.into()),
            tool_calls: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
        }
    }

    /// Wire role this record is sent as.
    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::ToolResult { .. } => Role::Tool,
        }
    }

    /// Plain text carried by the record, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { text } | Self::User { text, .. } => Some(text),
            Self::Assistant { text, .. } => text.as_deref(),
            Self::ToolResult { .. } => None,
        }
    }

    /// Tool calls requested by an assistant record; empty for everything else.
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls,
            _ => &[],
        }
    }
}

/// The ordered, append-only record log of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// Unique conversation ID, also sent as the request `user`
    pub id: ConversationId,

    records: Vec<ContentRecord>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last record was added
    pub updated_at: DateTime<Utc>,
}

impl ConversationHistory {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            records: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a record.
    pub fn push(&mut self, record: ContentRecord) {
        self.updated_at = Utc::now();
        self.records.push(record);
    }

    pub fn records(&self) -> &[ContentRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ContentRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when tool results were appended that the model has not seen yet.
    pub fn unresponded_tool_results(&self) -> bool {
        matches!(self.records.last(), Some(ContentRecord::ToolResult { .. }))
    }

    /// Tool calls that have no matching `ToolResult` anywhere in the history.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let answered: HashSet<&str> = self
            .records
            .iter()
            .filter_map(|r| match r {
                ContentRecord::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();

        self.records
            .iter()
            .flat_map(ContentRecord::tool_calls)
            .filter(|call| !answered.contains(call.id.as_str()))
            .collect()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: "lookup".into(),
            args: serde_json::Map::new(),
        }
    }

    #[test]
    fn developer_input_is_system() {
        let record = ContentRecord::developer("be terse");
        assert_eq!(record.role(), Role::System);
        assert_eq!(record.text(), Some("be terse"));
    }

    #[test]
    fn developer_role_deserializes_as_system() {
        let role: Role = serde_json::from_str(r#""developer""#).unwrap();
        assert_eq!(role, Role::System);
        assert_eq!(serde_json::to_string(&role).unwrap(), r#""system""#);
    }

    #[test]
    fn history_tracks_updates() {
        let mut history = ConversationHistory::new();
        let created = history.created_at;

        history.push(ContentRecord::user("First message"));
        assert_eq!(history.len(), 1);
        assert!(history.updated_at >= created);
    }

    #[test]
    fn unresponded_only_when_last_is_tool_result() {
        let mut history = ConversationHistory::new();
        history.push(ContentRecord::user("hi"));
        assert!(!history.unresponded_tool_results());

        history.push(ContentRecord::Assistant {
            text: None,
            tool_calls: Some(vec![call("call_1")]),
        });
        assert!(!history.unresponded_tool_results());

        history.push(ContentRecord::tool_result(
            "call_1",
            "lookup",
            serde_json::json!({"ok": true}),
        ));
        assert!(history.unresponded_tool_results());

        history.push(ContentRecord::assistant("done"));
        assert!(!history.unresponded_tool_results());
    }

    #[test]
    fn pending_tool_calls_ignores_answered() {
        let mut history = ConversationHistory::new();
        history.push(ContentRecord::Assistant {
            text: None,
            tool_calls: Some(vec![call("call_1"), call("call_2")]),
        });
        history.push(ContentRecord::tool_result("call_1", "lookup", serde_json::Value::Null));

        let pending = history.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "call_2");
    }

    #[test]
    fn record_serialization_roundtrip() {
        let record = ContentRecord::user_with_attachments(
            "look at this",
            vec![AttachmentRef::new("/tmp/cat.png").with_mime_type("image/png")],
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""kind":"user""#));
        let back: ContentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
