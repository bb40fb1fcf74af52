//! Commander MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! Every tool call is forwarded to one shared [`SessionEngine`]. The engine is
//! thread-based, so calls run on the blocking pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use commander_core::{CommanderConfig, Error};
use commander_session::{SessionEngine, TestOverrides};

use crate::tools::*;

/// Extra time granted on top of the engine's own limits before a blocking
/// call is abandoned.
const BLOCKING_GRACE: Duration = Duration::from_secs(30);

/// Map an engine error onto an MCP error, keeping captured output as data.
pub fn to_mcp_error(err: &Error) -> McpError {
    let code = match err {
        Error::InvalidInput(_) | Error::ExtractionFailure(_) | Error::Serialization(_) => {
            ErrorCode(-32602) // Invalid params
        }
        _ => ErrorCode(-32603), // Internal error
    };
    let data = err
        .captured_output()
        .filter(|output| !output.is_empty())
        .map(|output| json!({ "output": output }));
    McpError::new(code, err.to_string(), data)
}

fn to_text<T: Serialize>(value: &T, fallback: &str) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_else(|_| fallback.to_string()),
    )])
}

/// Commander MCP Server
///
/// Exposes one persistent Commander session through MCP tools.
#[derive(Clone)]
pub struct CommanderMcpServer {
    /// Shared session engine
    engine: Arc<SessionEngine>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CommanderMcpServer {
    /// Create a server around an existing engine.
    pub fn new(engine: SessionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }

    /// Create a server from configuration, honoring test overrides.
    pub fn from_config(
        config: &CommanderConfig,
        overrides: &TestOverrides,
    ) -> commander_core::Result<Self> {
        Ok(Self::new(SessionEngine::with_overrides(config, overrides)?))
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.engine
    }

    fn startup_limit(&self) -> Duration {
        let settings = self.engine.settings();
        settings.startup_timeout(self.engine.platform())
            + Duration::from_millis(settings.spawn_settle_ms)
            + BLOCKING_GRACE
    }

    /// Run `f` on the blocking pool, abandoning it after `limit`.
    async fn run_blocking<T, F>(&self, label: &str, limit: Duration, f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<SessionEngine>) -> commander_core::Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let result = tokio::time::timeout(limit, tokio::task::spawn_blocking(move || f(engine))).await;

        match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => {
                warn!("{} failed: {}", label, e);
                Err(to_mcp_error(&e))
            }
            Ok(Err(e)) => {
                error!("{} task panicked: {}", label, e);
                Err(McpError::new(
                    ErrorCode(-32603),
                    format!("{label} task failed: {e}"),
                    None,
                ))
            }
            Err(_) => {
                error!("{} did not finish within {:?}", label, limit);
                Err(McpError::new(
                    ErrorCode(-32603),
                    format!("{label} did not finish within {} seconds", limit.as_secs()),
                    None,
                ))
            }
        }
    }

    /// Start the session and report its status.
    pub async fn start(&self) -> Result<SessionStatusResponse, McpError> {
        let already_ready = self.engine.is_ready();
        let limit = self.startup_limit();
        self.run_blocking("Session start", limit, |engine| engine.start_session())
            .await?;

        let session = self.engine.info();
        let message = if already_ready {
            "Session already running".to_string()
        } else {
            "Session started".to_string()
        };
        Ok(SessionStatusResponse { session, message })
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatusResponse {
        let session = self.engine.info();
        let message = format!(
            "Session is {}{}",
            session.state,
            if session.canned { " (test mode)" } else { "" }
        );
        SessionStatusResponse { session, message }
    }

    /// Stop the session.
    pub async fn stop(&self) -> Result<SessionStatusResponse, McpError> {
        let grace = Duration::from_millis(self.engine.settings().shutdown_grace_ms);
        self.run_blocking("Session stop", grace + BLOCKING_GRACE, |engine| {
            engine.stop_session();
            Ok(())
        })
        .await?;

        Ok(SessionStatusResponse {
            session: self.engine.info(),
            message: "Session stopped".to_string(),
        })
    }

    /// Run a command through the retry layer.
    pub async fn execute(&self, params: ExecuteParams) -> Result<ExecuteResponse, McpError> {
        let config = params.retry_config(
            self.engine.retry_settings(),
            self.engine.settings().command_timeout_secs,
        );

        let mut limit = self.startup_limit();
        for attempt in 1..=config.attempts() {
            limit += config.timeout() + config.delay_for_attempt(attempt);
        }

        debug!(
            "Executing '{}' with preset {:?}: {} attempt(s), {}s timeout",
            params.command,
            params.preset,
            config.attempts(),
            config.timeout_secs
        );

        let started = Instant::now();
        let command = params.command.clone();
        let output = self
            .run_blocking("Command", limit, move |engine| {
                engine.execute_with_retry(&command, &config)
            })
            .await?;

        let json = match params.extract_json {
            Some(kind) => Some(kind.extract(&output).map_err(|e| to_mcp_error(&e))?),
            None => None,
        };

        Ok(ExecuteResponse {
            command: params.command,
            output,
            json,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Start the Commander session
    #[tool(
        description = "Start the persistent Keeper Commander session (no-op when already running)"
    )]
    #[instrument(skip_all)]
    pub async fn commander_session_start(
        &self,
        Parameters(_params): Parameters<SessionStartParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Starting Commander session");
        let response = self.start().await?;
        Ok(to_text(&response, &response.message))
    }

    /// Report session status
    #[tool(description = "Report the Commander session state, pid and command count")]
    #[instrument(skip_all)]
    pub async fn commander_session_status(
        &self,
        Parameters(_params): Parameters<SessionStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.status();
        Ok(to_text(&response, &response.message))
    }

    /// Stop the Commander session
    #[tool(description = "Stop the Commander session (safe to call when not running)")]
    #[instrument(skip_all)]
    pub async fn commander_session_stop(
        &self,
        Parameters(_params): Parameters<SessionStopParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Stopping Commander session");
        let response = self.stop().await?;
        Ok(to_text(&response, &response.message))
    }

    /// Execute a Commander command
    #[tool(
        description = "Execute a single-line Commander command in the persistent session. \
                       Starts the session on demand. Optional preset (none, object, array, password) \
                       validates the output and retries; extract_json parses JSON out of the output."
    )]
    #[instrument(skip_all)]
    pub async fn commander_execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Executing command: '{}'", params.command);
        let response = self.execute(params).await?;
        info!(
            "Command '{}' finished in {}ms ({} bytes)",
            response.command,
            response.elapsed_ms,
            response.output.len()
        );
        Ok(to_text(&response, &response.output))
    }

    /// Extract JSON from raw output
    #[tool(description = "Extract the first balanced JSON object or array from noisy CLI output")]
    #[instrument(skip_all)]
    pub async fn commander_extract_json(
        &self,
        Parameters(params): Parameters<ExtractJsonParams>,
    ) -> Result<CallToolResult, McpError> {
        let json = params.kind.extract(&params.text).map_err(|e| to_mcp_error(&e))?;
        let response = ExtractJsonResponse {
            kind: params.kind,
            json,
        };
        Ok(to_text(&response, "JSON extracted"))
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for CommanderMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Commander MCP Server - Run Keeper Commander commands in one persistent, \
                 already-authenticated interactive session. \
                 Use commander_execute to run a command (the session starts on demand), \
                 commander_session_status to inspect it, and commander_session_stop to end it."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let invalid = to_mcp_error(&Error::InvalidInput("empty".to_string()));
        assert_eq!(invalid.code.0, -32602);

        let timeout = to_mcp_error(&Error::CommandTimeout {
            command: "list".to_string(),
            timeout_secs: 1,
            output: "partial".to_string(),
        });
        assert_eq!(timeout.code.0, -32603);
        assert_eq!(timeout.data, Some(json!({ "output": "partial" })));

        let missing = to_mcp_error(&Error::CliNotFound("install it".to_string()));
        assert_eq!(missing.code.0, -32603);
        assert!(missing.data.is_none());
    }
}
