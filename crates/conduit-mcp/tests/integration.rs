// SPDX-License-Identifier: MIT
//! End-to-end integration tests for the "ask user" MCP server.
//!
//! Each test drives a real [`AskUserServer`] over in-memory pipes, sending
//! raw JSON-RPC 2.0 messages and validating the responses. This exercises
//! the full rmcp dispatch path and confirms the wire format a real MCP
//! host (the ACP agent) will see.
//!
//! The helpers in this file intentionally use raw JSON instead of an rmcp
//! client so tests are independent of the rmcp client API and directly
//! verify what's on the wire.

use std::sync::Arc;
use std::time::Duration;

use conduit_mcp::{AskUserServer, AskUserState};
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

// ── In-process MCP server harness ────────────────────────────────────────────

/// Starts an [`AskUserServer`] in a background task connected to in-memory
/// pipes. Returns a writer (to send JSON-RPC to the server) and a buffered
/// reader (to read JSON-RPC responses from the server), plus the
/// [`AskUserState`] the test drives to answer questions.
async fn start_test_server() -> (
    WriteHalf<DuplexStream>,
    BufReader<tokio::io::ReadHalf<DuplexStream>>,
    Arc<AskUserState>,
    mpsc::Receiver<conduit_mcp::UserQuestionRequest>,
) {
    let (client_stream, server_stream) = tokio::io::duplex(65536);
    let (question_tx, question_rx) = mpsc::channel(8);
    let state = AskUserState::new(question_tx);

    let server_state = state.clone();
    tokio::spawn(async move {
        let server = AskUserServer::new(server_state);
        if let Ok(running) = server.serve(server_stream).await {
            let _ = running.waiting().await;
        }
    });

    let (client_read, client_write) = tokio::io::split(client_stream);
    let reader = BufReader::new(client_read);
    (client_write, reader, state, question_rx)
}

async fn send_msg(writer: &mut WriteHalf<DuplexStream>, msg: &Value) {
    let line = serde_json::to_string(msg).expect("message must serialize");
    writer.write_all(line.as_bytes()).await.expect("write failed");
    writer.write_all(b"\n").await.expect("newline write failed");
    writer.flush().await.expect("flush failed");
}

async fn recv_msg(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for server response")
        .expect("read error");
    serde_json::from_str(line.trim()).expect("server response must be valid JSON")
}

/// Sends the MCP `initialize` handshake and drains the matching response
/// plus the `notifications/initialized` notification. Returns the
/// `initialize` result object.
async fn initialize(writer: &mut WriteHalf<DuplexStream>, reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> Value {
    send_msg(
        writer,
        &json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "conduit-test-client", "version": "0.0.0" }
            }
        }),
    )
    .await;

    let init_resp = recv_msg(reader).await;
    assert_eq!(init_resp["jsonrpc"], "2.0", "initialize response must be JSON-RPC 2.0");
    assert!(init_resp["result"].is_object(), "initialize must return a result object");

    send_msg(writer, &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })).await;

    init_resp["result"].clone()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_declares_tools_capability() {
    let (mut writer, mut reader, _state, _questions) = start_test_server().await;
    let result = initialize(&mut writer, &mut reader).await;
    assert!(result["capabilities"]["tools"].is_object(), "server must advertise tools capability; got: {result}");
}

#[tokio::test]
async fn tools_list_returns_ask_user_question() {
    let (mut writer, mut reader, _state, _questions) = start_test_server().await;
    initialize(&mut writer, &mut reader).await;

    send_msg(&mut writer, &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} })).await;

    let resp = recv_msg(&mut reader).await;
    let tools = resp["result"]["tools"].as_array().expect("tools must be an array");
    assert_eq!(tools.len(), 1, "expected exactly 1 tool");
    assert_eq!(tools[0]["name"], "ask_user_question");
    let required = tools[0]["inputSchema"]["required"].as_array().expect("required array");
    assert!(required.iter().any(|v| v == "question"));
}

/// A full round trip: the client calls `ask_user_question`, the test reads
/// the published request off the question channel and answers it, and the
/// `tools/call` response carries that answer back over the wire.
#[tokio::test]
async fn tools_call_round_trips_through_the_question_channel() {
    let (mut writer, mut reader, state, mut questions) = start_test_server().await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "ask_user_question",
                "arguments": { "question": "proceed?", "options": [{ "label": "yes" }, { "label": "no" }] }
            }
        }),
    )
    .await;

    let request = tokio::time::timeout(Duration::from_secs(5), questions.recv())
        .await
        .expect("timed out waiting for the question")
        .expect("question channel closed");
    assert_eq!(request.question, "proceed?");
    assert_eq!(request.options.len(), 2);
    state.answer(&request.id, "yes".to_string());

    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], false);
    let content = resp["result"]["content"].as_array().expect("content must be an array");
    assert_eq!(content[0]["text"], "yes");
}

#[tokio::test]
async fn tools_call_missing_question_argument_is_a_tool_error() {
    let (mut writer, mut reader, _state, _questions) = start_test_server().await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": { "name": "ask_user_question", "arguments": {} } }),
    )
    .await;

    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true, "missing 'question' must be a tool-level error; got {resp}");
}

#[tokio::test]
async fn tools_call_unknown_tool_returns_is_error() {
    let (mut writer, mut reader, _state, _questions) = start_test_server().await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": { "name": "nonexistent", "arguments": {} } }),
    )
    .await;

    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true, "unknown tool must produce a tool-level error; got: {resp}");
}

#[tokio::test]
async fn ask_user_question_without_options_defaults_to_empty_list() {
    let (mut writer, mut reader, state, mut questions) = start_test_server().await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": { "name": "ask_user_question", "arguments": { "question": "name?" } } }),
    )
    .await;

    let request = tokio::time::timeout(Duration::from_secs(5), questions.recv()).await.unwrap().unwrap();
    assert!(request.options.is_empty());
    state.answer(&request.id, "conduit".to_string());

    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["content"][0]["text"], "conduit");
}
