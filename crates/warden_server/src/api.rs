//! HTTP surface

use crate::auth::AuthToken;
use crate::dispatch::{CommandDispatcher, DispatchRequest, DispatchResult, DispatchStatus, Language};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use http::{Method, header};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use warden_core::CoreResult;

/// Service name reported by the health probe
pub const SERVICE_NAME: &str = "warden-server";

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Verbose logging
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            debug: true,
        }
    }
}

impl ServerConfig {
    /// Set the bind host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable debug mode
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Dispatcher used by the command endpoint
    pub dispatcher: Arc<CommandDispatcher>,
}

impl AppState {
    /// Wrap a dispatcher
    #[must_use]
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    /// `ok` or `error`
    pub status: DispatchStatus,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Diagnostic on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ApiResponse {
    /// Success envelope
    #[must_use]
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Ok,
            data: Some(data.into()),
            msg: None,
        }
    }

    /// Failure envelope
    #[must_use]
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Error,
            data: None,
            msg: Some(msg.into()),
        }
    }
}

impl From<DispatchResult> for ApiResponse {
    fn from(result: DispatchResult) -> Self {
        Self {
            status: result.status,
            data: result.data,
            msg: result.message,
        }
    }
}

/// Query parameters of the command endpoint
#[derive(Debug, Default, Deserialize)]
pub struct CommandQuery {
    /// Language identifier
    pub language: Option<String>,
    /// JSON array of command tokens
    pub args: Option<String>,
    /// Request hash
    pub m: Option<String>,
    /// Timestamp the hash was computed over
    pub t: Option<String>,
}

impl From<CommandQuery> for DispatchRequest {
    fn from(query: CommandQuery) -> Self {
        let language = Language::parse(query.language.as_deref().unwrap_or_default());
        DispatchRequest::new(language, query.args).with_token(AuthToken::from_parts(query.m, query.t))
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ]);

    Router::new()
        .route("/api/run-casbin-command", get(run_command))
        .route("/api/refresh-engines", post(refresh_engines))
        .route("/health", get(health))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn run_command(
    State(state): State<AppState>,
    query: Result<Query<CommandQuery>, QueryRejection>,
) -> (StatusCode, Json<ApiResponse>) {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected query string");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(rejection.body_text())),
            );
        }
    };
    let result = state.dispatcher.dispatch(query.into()).await;
    let status = StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(result.into()))
}

async fn refresh_engines() -> Json<ApiResponse> {
    tracing::info!("engine refresh requested");
    Json(ApiResponse::ok("Evaluation engine refreshed"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(%detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(format!("Internal server error: {detail}"))),
    )
        .into_response()
}

/// HTTP server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a server
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: CommandDispatcher) -> Self {
        Self {
            config,
            state: AppState::new(dispatcher),
        }
    }

    /// Listener settings
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The router this server serves
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind and serve until the process is stopped
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or the server fails
    pub async fn serve(self) -> CoreResult<()> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            %addr,
            program = %self.state.dispatcher.config().program.display(),
            debug = self.config.debug,
            "warden-server listening"
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::dispatch::DispatcherConfig;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tower::ServiceExt;

    fn app(dir: &Path) -> Router {
        let dispatcher = CommandDispatcher::new(
            DispatcherConfig::default()
                .with_program("sh")
                .with_working_dir(dir),
        );
        router(AppState::new(dispatcher))
    }

    /// Percent-encode a query value
    fn encode(value: &str) -> String {
        value
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_api_response_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::ok("x")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "data": "x"}));
        let json = serde_json::to_value(ApiResponse::error("bad")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "msg": "bad"}));
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::default().with_host("0.0.0.0").with_port(9000);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert!(config.debug);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_refresh_engines() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::post("/api/refresh-engines")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"], "Evaluation engine refreshed");
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            get_json(app(dir.path()), "/api/run-casbin-command?language=java").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(
            body["data"],
            "CLI version: unavailable\nLibrary version: unavailable"
        );
    }

    #[tokio::test]
    async fn test_missing_language_gets_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()), "/api/run-casbin-command").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_args() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            get_json(app(dir.path()), "/api/run-casbin-command?language=python").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["msg"], "Missing args parameter");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_invalid_args_json() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/run-casbin-command?language=python&args={}",
            encode("[\"unterminated")
        );
        let (status, body) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["msg"]
                .as_str()
                .unwrap()
                .starts_with("Invalid JSON in args: ")
        );
    }

    #[tokio::test]
    async fn test_command_success() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/run-casbin-command?language=python&args={}",
            encode(r#"["-c","echo true"]"#)
        );
        let (status, body) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok", "data": "true"}));
    }

    #[tokio::test]
    async fn test_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/run-casbin-command?language=python&args={}",
            encode(r#"["-c","echo 'missing [matchers]' >&2; exit 2"]"#)
        );
        let (status, body) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["msg"], "missing [matchers]");
    }

    #[tokio::test]
    async fn test_signed_request() {
        let dir = tempfile::tempdir().unwrap();
        let args = r#"["-c","echo signed"]"#;
        let fields = DispatchRequest::new(Language::Python, Some(args.to_string())).signed_fields();
        let (hash, timestamp) = Authenticator::default().sign(&fields);

        let uri = format!(
            "/api/run-casbin-command?language=python&args={}&m={}&t={}",
            encode(args),
            hash,
            encode(&timestamp)
        );
        let (status, body) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "signed");
    }

    #[tokio::test]
    async fn test_bad_hash() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/run-casbin-command?language=python&args={}&m=deadbeef&t=2024-01-01T00%3A00%3A00Z",
            encode(r#"["-c","echo hi"]"#)
        );
        let (status, body) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["msg"], "Invalid authentication hash");
    }

    #[tokio::test]
    async fn test_hash_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/run-casbin-command?language=python&args={}&m=deadbeef",
            encode(r#"["-c","echo hi"]"#)
        );
        let (status, _) = get_json(app(dir.path()), &uri).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_query_uses_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(
            app(dir.path()),
            "/api/run-casbin-command?language=python&language=java",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(!body["msg"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "http://editor.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/run-casbin-command")
                    .header(header::ORIGIN, "http://editor.local")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let methods = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        for method in ["GET", "PUT", "POST", "DELETE", "OPTIONS"] {
            assert!(methods.contains(method), "missing {method} in {methods}");
        }
    }

    #[test]
    fn test_panic_response_is_envelope() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
