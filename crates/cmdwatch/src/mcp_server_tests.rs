use super::*;
use cw_session::Hooks;

fn surface() -> TerminalTools {
    TerminalTools::new(SessionStore::new(10), Config::default(), Hooks::default())
}

fn request(value: Value) -> JsonRpcRequest {
    serde_json::from_value(value).expect("valid request")
}

#[tokio::test]
async fn initialize_reports_server_and_capabilities() {
    let response = handle_request(
        &surface(),
        request(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
    )
    .await
    .expect("initialize gets a response");

    let result = response.result.expect("result");
    assert!(result.get("protocol").is_some());
    assert_eq!(result["server"]["name"], "cmdwatch");
    assert_eq!(result["capabilities"]["tools"], true);
    assert_eq!(result["capabilities"]["sampling"], false);
    assert_eq!(result["capabilities"]["resources"], false);
    assert_eq!(response.id, Some(json!(1)));
}

#[tokio::test]
async fn initialized_notification_produces_no_frame() {
    let response = handle_request(
        &surface(),
        request(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
    )
    .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn tools_list_advertises_the_full_catalog() {
    let response = handle_request(
        &surface(),
        request(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})),
    )
    .await
    .expect("response");

    let result = response.result.expect("result");
    let tools = result["tools"].as_array().expect("tools array");
    let names: Vec<&str> = tools
        .iter()
        .map(|t| t["name"].as_str().expect("name"))
        .collect();
    assert_eq!(
        names,
        vec![
            "terminal.run",
            "terminal.status",
            "terminal.write",
            "terminal.signal",
            "terminal.list",
            "terminal.attach",
        ]
    );
    for tool in tools {
        assert!(tool.get("inputSchema").is_some(), "missing schema: {tool}");
        assert!(tool.get("description").is_some());
    }
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let response = handle_request(
        &surface(),
        request(json!({"jsonrpc": "2.0", "id": 3, "method": "sessions/purge"})),
    )
    .await
    .expect("response");
    let error = response.error.expect("error");
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("sessions/purge"));
}

#[tokio::test]
async fn unknown_tool_is_a_tool_call_error() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "terminal.reboot", "arguments": {}}
        })),
    )
    .await
    .expect("response");
    let error = response.error.expect("error");
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("Unknown tool"));
}

#[cfg(unix)]
#[tokio::test]
async fn run_tool_returns_text_and_json_content() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {
                "name": "terminal.run",
                "arguments": {"command": "echo via-rpc", "quietMs": 150}
            }
        })),
    )
    .await
    .expect("response");

    let result = response.result.expect("result");
    let content = result["content"].as_array().expect("content array");
    assert_eq!(content.len(), 2);
    assert_eq!(content[0]["type"], "text");
    assert!(content[0]["text"].as_str().expect("text").contains("via-rpc"));
    assert_eq!(content[1]["type"], "json");
    assert_eq!(content[1]["json"]["success"], true);
    assert_eq!(content[1]["json"]["exitCode"], 0);
}

#[tokio::test]
async fn status_without_session_id_errors() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "tools/call",
            "params": {"name": "terminal.status", "arguments": {}}
        })),
    )
    .await
    .expect("response");
    let error = response.error.expect("error");
    assert!(error.message.contains("sessionId"));
}

#[tokio::test]
async fn unknown_session_surfaces_as_tool_error() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "terminal.attach",
                "arguments": {"sessionId": "01ARZ3NDEKTSV4RRFFQ69G5FAV"}
            }
        })),
    )
    .await
    .expect("response");
    let error = response.error.expect("error");
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("No session"));
}

#[tokio::test]
async fn invalid_signal_name_is_rejected() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "tools/call",
            "params": {
                "name": "terminal.signal",
                "arguments": {"sessionId": "whatever", "signal": "SIGUSR1"}
            }
        })),
    )
    .await
    .expect("response");
    let error = response.error.expect("error");
    assert!(error.message.contains("Unknown signal"));
}

#[tokio::test]
async fn list_reports_no_sessions_initially() {
    let response = handle_request(
        &surface(),
        request(json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": {"name": "terminal.list", "arguments": {}}
        })),
    )
    .await
    .expect("response");

    let result = response.result.expect("result");
    let content = result["content"].as_array().expect("content");
    assert!(content[0]["text"].as_str().expect("text").contains("No sessions"));
    assert_eq!(content[1]["json"]["sessions"], json!([]));
}

#[tokio::test]
async fn shutdown_returns_empty_result() {
    let response = handle_request(
        &surface(),
        request(json!({"jsonrpc": "2.0", "id": 10, "method": "shutdown"})),
    )
    .await
    .expect("response");
    assert_eq!(response.result, Some(json!({})));
}

#[test]
fn parse_error_frame_shape() {
    let frame = JsonRpcResponse::failure(None, -32700, "Parse error: bad".to_string());
    let value = serde_json::to_value(&frame).expect("serializable");
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["error"]["code"], -32700);
    assert_eq!(value["id"], Value::Null);
}
