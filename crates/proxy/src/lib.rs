//! Stateless forwarding proxy for a local LLM server.
//!
//! Every request except `GET /health` is forwarded to the configured target
//! with the same method, path, query and body. A bearer token is injected
//! when one is configured, so clients on the local network do not need to
//! know it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use local_llm_config::ProxyConfig;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid proxy API key: {0}")]
    InvalidApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Proxy server error: {0}")]
    Serve(std::io::Error),
}

/// Shared state for the proxy handlers.
pub struct ProxyState {
    target_url: String,
    authorization: Option<HeaderValue>,
    client: reqwest::Client,
}

impl ProxyState {
    pub fn new(
        target_url: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let authorization = match api_key.filter(|k| !k.is_empty()) {
            Some(key) => Some(
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| ProxyError::InvalidApiKey(e.to_string()))?,
            ),
            None => None,
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            target_url: target_url.into().trim_end_matches('/').to_string(),
            authorization,
            client,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Self::new(
            config.target_url.clone(),
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }
}

type SharedState = Arc<ProxyState>;

/// Build the proxy router: `/health` plus a catch-all forwarder.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(proxy_handler)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind to the configured address and serve until the process exits.
pub async fn start(config: ProxyConfig) -> Result<(), ProxyError> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = ProxyState::from_config(&config)?;

    info!(target_url = %state.target_url, timeout_secs = config.timeout_secs, "Starting Local LLM proxy");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, "Proxy listening");

    axum::serve(listener, build_router(state))
        .await
        .map_err(ProxyError::Serve)
}

async fn health_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "target": state.target_url,
    }))
}

async fn proxy_handler(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_start_matches('/');
    let target = match uri.query() {
        Some(query) => format!("{}/{path}?{query}", state.target_url),
        None => format!("{}/{path}", state.target_url),
    };

    headers.remove(HOST);
    headers.remove(CONNECTION);
    if let Some(authorization) = &state.authorization {
        headers.insert(AUTHORIZATION, authorization.clone());
    }

    debug!(method = %method, path, target = %target, "Proxying request");

    match forward(&state.client, method, &target, headers, body).await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            error!(target = %target, "Timeout connecting to LLM server");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(serde_json::json!({ "error": "Timeout connecting to LLM server" })),
            )
                .into_response()
        }
        Err(e) => {
            error!(target = %target, error = %e, "Error proxying request");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "error": format!("Error connecting to LLM server: {e}")
                })),
            )
                .into_response()
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    method: Method,
    target: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, reqwest::Error> {
    let upstream = client
        .request(method, target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);

    let body = upstream.bytes().await?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::any;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Upstream that echoes what it received as JSON.
    async fn spawn_upstream() -> String {
        async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            };
            let status = if uri.path() == "/missing" {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::OK
            };
            (
                status,
                [("x-upstream", "yes")],
                Json(serde_json::json!({
                    "method": method.as_str(),
                    "path": uri.path(),
                    "query": uri.query(),
                    "authorization": header("authorization"),
                    "host": header("host"),
                    "custom": header("x-custom"),
                    "body": String::from_utf8_lossy(&body),
                })),
            )
                .into_response()
        }

        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }

        let app = Router::new()
            .route("/slow", any(slow))
            .fallback(echo);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_target() {
        let state = ProxyState::new("http://llm:11434/", None, Duration::from_secs(5)).unwrap();
        let app = build_router(state);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["target"], "http://llm:11434");
    }

    #[tokio::test]
    async fn forwards_method_path_query_and_body() {
        let upstream = spawn_upstream().await;
        let state = ProxyState::new(&upstream, Some("sk-secret"), Duration::from_secs(5)).unwrap();
        let app = build_router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions?stream=true")
            .header("host", "proxy.local")
            .header("x-custom", "kept")
            .header("authorization", "Bearer client-token")
            .body(Body::from(r#"{"model":"llama3.1"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let json = json_body(response).await;
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/v1/chat/completions");
        assert_eq!(json["query"], "stream=true");
        assert_eq!(json["authorization"], "Bearer sk-secret");
        assert_eq!(json["custom"], "kept");
        assert_eq!(json["body"], r#"{"model":"llama3.1"}"#);
        assert_ne!(json["host"], "proxy.local");
    }

    #[tokio::test]
    async fn client_authorization_passes_through_without_key() {
        let upstream = spawn_upstream().await;
        let app = build_router(ProxyState::new(&upstream, None, Duration::from_secs(5)).unwrap());

        let req = Request::builder()
            .uri("/v1/models")
            .header("authorization", "Bearer client-token")
            .body(Body::empty())
            .unwrap();
        let json = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["method"], "GET");
        assert_eq!(json["authorization"], "Bearer client-token");
        assert!(json["query"].is_null());
    }

    #[tokio::test]
    async fn upstream_status_is_preserved() {
        let upstream = spawn_upstream().await;
        let app = build_router(ProxyState::new(&upstream, None, Duration::from_secs(5)).unwrap());

        let req = Request::builder().uri("/missing").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state =
            ProxyState::new(format!("http://{addr}"), None, Duration::from_secs(5)).unwrap();
        let app = build_router(state);

        let req = Request::builder().uri("/v1/models").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = json_body(response).await;
        assert!(json["error"]
            .as_str()
            .unwrap()
            .starts_with("Error connecting to LLM server: "));
    }

    #[tokio::test]
    async fn slow_upstream_is_gateway_timeout() {
        let upstream = spawn_upstream().await;
        let app = build_router(ProxyState::new(&upstream, None, Duration::from_millis(200)).unwrap());

        let req = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "Timeout connecting to LLM server" })
        );
    }

    #[test]
    fn invalid_key_is_rejected() {
        let err = ProxyState::new("http://llm", Some("bad\nkey"), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::InvalidApiKey(_)));
    }

    #[test]
    fn state_from_config() {
        let config = ProxyConfig {
            target_url: "http://gpu-box:8000/".into(),
            api_key: Some("k".into()),
            timeout_secs: 30,
            host: "127.0.0.1".into(),
            port: 9090,
        };
        let state = ProxyState::from_config(&config).unwrap();
        assert_eq!(state.target_url(), "http://gpu-box:8000");
        assert!(state.authorization.is_some());
    }
}
