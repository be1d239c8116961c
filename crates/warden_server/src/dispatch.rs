//! Authenticated dispatch of evaluation commands.
//!
//! Each request runs through `Received -> Validated -> Authenticated ->
//! Dispatched -> Completed | Failed`. The evaluation command runs as a child
//! process with no stdin, captured output, a fixed working directory and a
//! hard deadline. A child that outlives the deadline is killed and reaped
//! before the timeout is reported.

use crate::auth::{AuthError, AuthToken, Authenticator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use warden_core::CoreError;

/// Output returned for languages this dispatcher has no command for
pub const PLACEHOLDER_OUTPUT: &str = "CLI version: unavailable\nLibrary version: unavailable";

/// Default evaluation binary
pub const DEFAULT_PROGRAM: &str = "warden";

/// Default deadline for one command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message used when a failing command wrote nothing to stderr
const EXECUTION_FAILED: &str = "Command execution failed";

/// Requested evaluation language
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    /// The one language with a real evaluation command
    Python,
    /// Anything else, answered with [`PLACEHOLDER_OUTPUT`]
    Unsupported(String),
}

impl Language {
    /// Parse a language identifier; matching is exact
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "python" => Self::Python,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// The identifier as sent by the client
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Python => "python",
            Self::Unsupported(name) => name,
        }
    }

    /// Whether requests in this language spawn a command
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Python)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the evaluation command is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments placed before the request's tokens
    pub base_args: Vec<String>,
    /// Working directory of the child
    pub working_dir: PathBuf,
    /// Deadline for one command
    pub timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            base_args: Vec::new(),
            working_dir: PathBuf::from("."),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    /// Set the program
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the leading arguments
    #[must_use]
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    /// Requested language
    pub language: Language,
    /// Raw `args` parameter: a JSON array of strings
    pub args: Option<String>,
    /// Authentication material
    pub token: AuthToken,
}

impl DispatchRequest {
    /// Create an unauthenticated request
    #[must_use]
    pub fn new(language: Language, args: Option<String>) -> Self {
        Self {
            language,
            args,
            token: AuthToken::Absent,
        }
    }

    /// Attach authentication material
    #[must_use]
    pub fn with_token(mut self, token: AuthToken) -> Self {
        self.token = token;
        self
    }

    /// Fields covered by the request hash
    #[must_use]
    pub fn signed_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("language".to_string(), self.language.as_str().to_string());
        if let Some(args) = &self.args {
            fields.insert("args".to_string(), args.clone());
        }
        fields
    }
}

/// Dispatch failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Missing or malformed request parameters
    #[error("{reason}")]
    InvalidInput {
        /// Client-facing reason
        reason: String,
    },
    /// The request hash did not verify
    #[error("Invalid authentication hash")]
    AuthenticationFailed(#[source] AuthError),
    /// The command exited unsuccessfully
    #[error("{message}")]
    ExecutionFailed {
        /// Trimmed stderr, or a generic message
        message: String,
        /// Exit code, absent if the child was killed by a signal
        exit_code: Option<i32>,
    },
    /// The command outlived its deadline
    #[error("Command execution timeout")]
    Timeout {
        /// The deadline that expired
        after: Duration,
    },
    /// Spawn or capture fault
    #[error("Internal server error: {message}")]
    Internal {
        /// Fault detail
        message: String,
    },
}

impl DispatchError {
    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::AuthenticationFailed(_) => 401,
            Self::ExecutionFailed { .. } | Self::Timeout { .. } | Self::Internal { .. } => 500,
        }
    }
}

impl From<AuthError> for DispatchError {
    fn from(err: AuthError) -> Self {
        Self::AuthenticationFailed(err)
    }
}

impl From<DispatchError> for CoreError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidInput { reason } => CoreError::InvalidInput { reason },
            DispatchError::AuthenticationFailed(_) => CoreError::AuthenticationFailed,
            DispatchError::ExecutionFailed { message, .. } => CoreError::ExecutionFailed { message },
            DispatchError::Timeout { after } => CoreError::Timeout {
                operation: format!("command execution ({}s)", after.as_secs_f64()),
            },
            DispatchError::Internal { message } => CoreError::Internal { message },
        }
    }
}

/// Outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Success
    Ok,
    /// Failure
    Error,
}

/// Structured outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Success or failure
    pub status: DispatchStatus,
    /// Trimmed stdout on success
    pub data: Option<String>,
    /// Diagnostic on failure
    pub message: Option<String>,
    /// HTTP status code
    pub status_code: u16,
    /// Child exit code when a child ran to completion
    pub exit_code: Option<i32>,
}

impl DispatchResult {
    /// A successful outcome
    #[must_use]
    pub fn ok(data: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            status: DispatchStatus::Ok,
            data: Some(data.into()),
            message: None,
            status_code: 200,
            exit_code,
        }
    }

    /// A failed outcome
    #[must_use]
    pub fn from_error(err: &DispatchError) -> Self {
        let exit_code = match err {
            DispatchError::ExecutionFailed { exit_code, .. } => *exit_code,
            _ => None,
        };
        Self {
            status: DispatchStatus::Error,
            data: None,
            message: Some(err.to_string()),
            status_code: err.status_code(),
            exit_code,
        }
    }

    /// Check if the outcome is a success
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == DispatchStatus::Ok
    }
}

/// Validates, authenticates and runs evaluation requests
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    config: DispatcherConfig,
    authenticator: Authenticator,
}

impl CommandDispatcher {
    /// Create a dispatcher with the default protocol version
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            authenticator: Authenticator::default(),
        }
    }

    /// Use a specific authenticator
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Launch configuration
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Handle one request; every failure is folded into the result
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResult {
        tracing::info!(
            language = %request.language,
            args = request.args.as_deref().unwrap_or(""),
            "received evaluation request"
        );

        match self.try_dispatch(request).await {
            Ok(result) => result,
            Err(err) => {
                match &err {
                    DispatchError::InvalidInput { reason } => {
                        tracing::debug!(%reason, "rejected request");
                    }
                    DispatchError::AuthenticationFailed(source) => {
                        tracing::warn!(%source, "hash verification failed");
                    }
                    DispatchError::ExecutionFailed { exit_code, .. } => {
                        tracing::debug!(?exit_code, "command failed");
                    }
                    DispatchError::Timeout { after } => {
                        tracing::warn!(?after, "command execution timeout");
                    }
                    DispatchError::Internal { message } => {
                        tracing::error!(%message, "dispatch fault");
                    }
                }
                DispatchResult::from_error(&err)
            }
        }
    }

    /// Handle one request, surfacing failures as errors
    ///
    /// # Errors
    ///
    /// Returns error for malformed input, a rejected token, a failing or
    /// overrunning command, or a spawn/capture fault
    pub async fn try_dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        if !request.language.is_supported() {
            tracing::info!(language = %request.language, "unsupported language, returning placeholder");
            return Ok(DispatchResult::ok(PLACEHOLDER_OUTPUT, None));
        }

        let tokens = parse_args(request.args.as_deref())?;
        tracing::debug!(?tokens, "parsed arguments");

        self.authenticator
            .check(&request.signed_fields(), &request.token)?;

        self.run(&tokens).await
    }

    async fn run(&self, tokens: &[String]) -> Result<DispatchResult, DispatchError> {
        let config = &self.config;
        tracing::info!(
            program = %config.program.display(),
            base_args = ?config.base_args,
            ?tokens,
            "executing command"
        );

        let mut child = Command::new(&config.program)
            .args(&config.base_args)
            .args(tokens)
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| internal(&config.program, e))?;

        let mut stdout = spawn_reader(child.stdout.take());
        let mut stderr = spawn_reader(child.stderr.take());

        // the deadline covers the exit and both pipes reaching EOF
        let completion = async {
            let status = child
                .wait()
                .await
                .map_err(|e| internal(&config.program, e))?;
            let stdout = collect(&mut stdout).await?;
            let stderr = collect(&mut stderr).await?;
            Ok::<_, DispatchError>((status, stdout, stderr))
        };

        let outcome = tokio::time::timeout(config.timeout, completion).await;
        let (status, stdout, stderr) = match outcome {
            Ok(outcome) => outcome?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::error!(error = %e, "failed to terminate timed out command");
                }
                stdout.abort();
                stderr.abort();
                return Err(DispatchError::Timeout {
                    after: config.timeout,
                });
            }
        };

        tracing::debug!(exit_code = ?status.code(), %stdout, %stderr, "command finished");

        if status.success() {
            Ok(DispatchResult::ok(stdout.trim(), status.code()))
        } else {
            let message = match stderr.trim() {
                "" => EXECUTION_FAILED.to_string(),
                text => text.to_string(),
            };
            Err(DispatchError::ExecutionFailed {
                message,
                exit_code: status.code(),
            })
        }
    }
}

/// Parse the raw `args` parameter into command tokens
fn parse_args(raw: Option<&str>) -> Result<Vec<String>, DispatchError> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => {
            return Err(DispatchError::InvalidInput {
                reason: "Missing args parameter".to_string(),
            });
        }
    };
    serde_json::from_str(raw).map_err(|e| DispatchError::InvalidInput {
        reason: format!("Invalid JSON in args: {e}"),
    })
}

fn internal(program: &Path, err: std::io::Error) -> DispatchError {
    DispatchError::Internal {
        message: format!("{}: {err}", program.display()),
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(handle: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String, DispatchError> {
    let bytes = handle
        .await
        .map_err(|e| DispatchError::Internal {
            message: e.to_string(),
        })?
        .map_err(|e| DispatchError::Internal {
            message: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
