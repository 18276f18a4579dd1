//! OpenAI-compatible streaming provider.
//!
//! Works with any server exposing `/v1/chat/completions` with SSE streaming:
//! Ollama, vLLM, llama.cpp server, LM Studio, LocalAI, or OpenAI itself.
//!
//! HTTP status codes are classified into [`ProviderError`] here and nowhere
//! else. After a successful response starts, a background task reads the SSE
//! body and forwards parsed chunks over a channel; dropping the returned
//! stream stops that task.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use local_llm_config::ProviderConfig;
use local_llm_core::error::ProviderError;
use local_llm_core::provider::{ChatChunk, ChatRequest, ChunkStream, Provider, StreamOptions};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

const DONE_MARKER: &str = "[DONE]";
const INSUFFICIENT_QUOTA: &str = "insufficient_quota";
const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for `base_url` (the part before `/chat/completions`).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::new(
            "local",
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, mut request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        request.stream = true;
        request.stream_options = Some(StreamOptions {
            include_usage: true,
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending streaming request"
        );

        let response = self
            .authorize(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %body, "Provider returned error");
            return Err(classify_status(status, body));
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);

                    match parse_sse_line(line.trim_end()) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            trace!(provider = %provider_name, "Stream finished");
                            return;
                        }
                        SseLine::Item(item) => {
                            if tx.send(item).await.is_err() {
                                debug!(provider = %provider_name, "Stream receiver dropped");
                                return;
                            }
                        }
                    }
                }
            }

            debug!(provider = %provider_name, "Stream closed without [DONE]");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        Ok(response.status().is_success())
    }
}

enum SseLine {
    Skip,
    Done,
    Item(Result<ChatChunk, ProviderError>),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == DONE_MARKER {
        return SseLine::Done;
    }

    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, data, "Skipping unparseable SSE data");
            return SseLine::Skip;
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        let err = if has_error_kind(error, INSUFFICIENT_QUOTA) {
            ProviderError::QuotaExceeded(message)
        } else if has_error_kind(error, RATE_LIMIT_EXCEEDED) {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::StreamInterrupted(message)
        };
        return SseLine::Item(Err(err));
    }

    let has_choices = value.get("choices").is_some();
    match serde_json::from_value::<ChatChunk>(value) {
        Ok(chunk) => SseLine::Item(Ok(chunk)),
        Err(e) if has_choices => SseLine::Item(Err(ProviderError::StreamInterrupted(format!(
            "Malformed chunk: {e}"
        )))),
        Err(e) => {
            trace!(error = %e, data, "Skipping chunk with unexpected shape");
            SseLine::Skip
        }
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Map a non-2xx response to its error kind. A quota body wins over the
/// status code.
fn classify_status(status: u16, body: String) -> ProviderError {
    if is_insufficient_quota(&body) {
        return ProviderError::QuotaExceeded(body);
    }
    match status {
        429 => ProviderError::RateLimited(body),
        401 | 403 => ProviderError::AuthenticationFailed(if body.is_empty() {
            "Invalid API key or insufficient permissions".into()
        } else {
            body
        }),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn is_insufficient_quota(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .is_ok_and(|value| has_error_kind(&value["error"], INSUFFICIENT_QUOTA))
}

/// True when an error object names `kind` in its `type` or `code`.
fn has_error_kind(error: &serde_json::Value, kind: &str) -> bool {
    [&error["type"], &error["code"]]
        .iter()
        .any(|field| field.as_str() == Some(kind))
}
