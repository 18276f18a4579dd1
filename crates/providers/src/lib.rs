//! OpenAI-compatible provider plumbing for local-llm.
//!
//! - [`convert`]: history ⇄ wire messages
//! - [`schema`]: strict structured-output schema adjustment
//! - [`attachments`]: files → inline content parts
//! - [`stream`]: raw chunks → [`DeltaEvent`](local_llm_core::DeltaEvent)s
//! - [`openai_compat`]: the HTTP/SSE provider itself

pub mod attachments;
pub mod convert;
pub mod openai_compat;
pub mod schema;
pub mod stream;

pub use attachments::encode_attachments;
pub use convert::{AssistantTurn, to_wire_messages, tool_result_from_wire};
pub use openai_compat::OpenAiCompatProvider;
pub use schema::{adjust_schema, adjusted, format_response_format};
pub use stream::{StreamError, StreamTransformer, ToolCallAccumulator};
