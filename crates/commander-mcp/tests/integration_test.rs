//! Integration tests for the commander-mcp tool layer in canned mode.

use commander_core::{CommanderConfig, SessionState};
use commander_mcp::{CommanderMcpServer, ExecuteParams, JsonKind, RetryPreset};
use commander_session::{CannedResponses, SessionEngine, TestOverrides};

fn canned_server() -> CommanderMcpServer {
    let canned = CannedResponses::default()
        .with_response(
            "list --format=json",
            "Decrypted [2] record(s)\n[{\"record_uid\": \"a\"}, {\"record_uid\": \"b\"}]",
        )
        .with_response("get abc --format=json", "{\"record_uid\": \"abc\", \"title\": \"Email\"}")
        .with_response("generate --format=json", "[{\"password\": \"hunter2\"}]")
        .with_default("");

    let mut config = CommanderConfig::default();
    config.retry.retry_delay_ms = 1;

    let engine = SessionEngine::new(&config).unwrap().with_canned(canned);
    CommanderMcpServer::new(engine)
}

#[tokio::test]
async fn test_session_lifecycle() {
    let server = canned_server();

    let status = server.status();
    assert_eq!(status.session.state, SessionState::NotStarted);
    assert!(status.message.contains("test mode"));

    let started = server.start().await.unwrap();
    assert_eq!(started.message, "Session started");
    assert!(started.session.ready);

    let again = server.start().await.unwrap();
    assert_eq!(again.message, "Session already running");
    assert_eq!(again.session.session_id, started.session.session_id);

    let stopped = server.stop().await.unwrap();
    assert_eq!(stopped.session.state, SessionState::Dead);
    assert!(!stopped.session.ready);

    // Stopping twice is harmless
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_execute_plain() {
    let server = canned_server();

    let response = server
        .execute(ExecuteParams::new("get abc --format=json"))
        .await
        .unwrap();
    assert_eq!(response.command, "get abc --format=json");
    assert!(response.output.contains("\"abc\""));
    assert!(response.json.is_none());
    assert_eq!(server.status().session.commands_executed, 1);
}

#[tokio::test]
async fn test_execute_with_extraction() {
    let server = canned_server();

    let mut params = ExecuteParams::new("get abc --format=json");
    params.preset = RetryPreset::Object;
    params.extract_json = Some(JsonKind::Object);

    let response = server.execute(params).await.unwrap();
    let json = response.json.unwrap();
    assert_eq!(json["title"], "Email");
}

#[tokio::test]
async fn test_password_preset() {
    let server = canned_server();

    let mut params = ExecuteParams::new("generate --format=json");
    params.preset = RetryPreset::Password;
    params.extract_json = Some(JsonKind::Array);

    let response = server.execute(params).await.unwrap();
    assert_eq!(response.json.unwrap()[0]["password"], "hunter2");
}

#[tokio::test]
async fn test_validation_failure_is_internal_error() {
    let server = canned_server();

    let mut params = ExecuteParams::new("whoami");
    params.preset = RetryPreset::Array;
    params.max_retries = Some(2);

    let err = server.execute(params).await.unwrap_err();
    assert_eq!(err.code.0, -32603);
    assert!(err.message.contains("2 attempt(s)"));
    assert_eq!(server.status().session.commands_executed, 2);
}

#[tokio::test]
async fn test_invalid_command_is_invalid_params() {
    let server = canned_server();

    let err = server.execute(ExecuteParams::new("list\nwhoami")).await.unwrap_err();
    assert_eq!(err.code.0, -32602);

    let err = server.execute(ExecuteParams::new("   ")).await.unwrap_err();
    assert_eq!(err.code.0, -32602);
}

#[tokio::test]
async fn test_extraction_failure_is_invalid_params() {
    let server = canned_server();

    let mut params = ExecuteParams::new("whoami");
    params.extract_json = Some(JsonKind::Auto);

    let err = server.execute(params).await.unwrap_err();
    assert_eq!(err.code.0, -32602);
}

#[tokio::test]
async fn test_server_from_config_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let config_path = dir.path().join("commander.yaml");
    std::fs::write(
        &config_path,
        "session:\n  command_timeout_secs: 12\nretry:\n  retry_delay_ms: 1\n",
    )?;
    let canned_path = dir.path().join("canned.json");
    std::fs::write(
        &canned_path,
        r#"{"responses": {"list --format=json": "[{\"record_uid\": \"abc\"}]"}, "default": ""}"#,
    )?;

    let config = CommanderConfig::from_file(&config_path)?;
    assert_eq!(config.session.command_timeout_secs, 12);

    let overrides = TestOverrides::from_vars(Some("1"), Some(canned_path));
    let server = CommanderMcpServer::from_config(&config, &overrides)?;
    assert!(server.status().session.canned);

    let params = ExecuteParams::new("list --format=json");
    let retry = params.retry_config(
        server.engine().retry_settings(),
        server.engine().settings().command_timeout_secs,
    );
    assert_eq!(retry.timeout_secs, 12);

    let mut params = params;
    params.extract_json = Some(JsonKind::Array);
    let response = server.execute(params).await.unwrap();
    assert_eq!(response.json.unwrap()[0]["record_uid"], "abc");
    Ok(())
}

#[test]
fn test_banner_brackets_are_extracted_first() {
    // The sync banner contains brackets, so the listing must be extracted
    // after the banner line has been dropped.
    let output = "Decrypted [2] record(s)\n[{\"record_uid\": \"a\"}]";
    assert_eq!(JsonKind::Array.extract(output).unwrap(), serde_json::json!([2]));

    let listing = output.lines().skip(1).collect::<Vec<_>>().join("\n");
    let json = JsonKind::Array.extract(&listing).unwrap();
    assert_eq!(json[0]["record_uid"], "a");
}
