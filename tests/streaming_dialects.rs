use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;
use llm_stream_client::config::RequestOptions;
use llm_stream_client::{
    parse_tool_call_token, BackendDescriptor, ChatMessage, ClientError, Dialect, LlmInput,
    StreamingClient, ToolSpec,
};
use serde_json::json;

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn streaming_response(content_type: &'static str, body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(Body::from(body))
        .expect("stream response")
}

fn sse(lines: &[&str]) -> String {
    lines.iter().map(|line| format!("data: {line}\n\n")).collect()
}

fn ndjson(lines: &[&str]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}

fn client_for(endpoint: String, dialect: Dialect) -> StreamingClient {
    let backend = BackendDescriptor::new(endpoint, dialect).with_fallback_model("test-model");
    StreamingClient::for_backend(backend).expect("build client")
}

async fn collect(client: &StreamingClient, input: impl Into<LlmInput>) -> Vec<Result<String, ClientError>> {
    tokio::time::timeout(Duration::from_secs(10), client.stream(input).collect::<Vec<_>>())
        .await
        .expect("stream finished in time")
}

fn ok_items(items: Vec<Result<String, ClientError>>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.expect("no stream error"))
        .collect()
}

fn tool_snapshots(items: &[String]) -> Vec<serde_json::Value> {
    items
        .iter()
        .filter_map(|item| parse_tool_call_token(item))
        .map(|json| serde_json::from_str(json).expect("tool token json"))
        .collect()
}

fn without_ids(mut snapshot: serde_json::Value) -> serde_json::Value {
    if let Some(object) = snapshot.as_object_mut() {
        object.remove("id");
        object.remove("tool_call_id");
    }
    snapshot
}

fn search_tool() -> ToolSpec {
    ToolSpec {
        name: "search".to_string(),
        description: Some("Search the web".to_string()),
        parameters: json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }),
    }
}

#[tokio::test]
async fn test_openai_chat_weather_tool_call() {
    let captured = Arc::new(Mutex::new(Vec::<(HeaderMap, serde_json::Value)>::new()));
    let captured_clone = Arc::clone(&captured);
    let body = sse(&[
        r#"{"id":"c","choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather"}}]}}]}"#,
        r#"{"id":"c","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
        r#"{"id":"c","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ]);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, request: bytes::Bytes| {
            let captured = Arc::clone(&captured_clone);
            let body = body.clone();
            async move {
                let payload: serde_json::Value =
                    serde_json::from_slice(&request).expect("request json");
                captured.lock().expect("lock captured").push((headers, payload));
                streaming_response("text/event-stream", body)
            }
        }),
    );
    let (base, server) = spawn_upstream(app).await;

    let backend = BackendDescriptor::new(format!("{base}/v1"), Dialect::OpenAiChat)
        .with_api_key("sk-test")
        .with_fallback_model("gpt-4o-mini");
    let client = StreamingClient::for_backend(backend).expect("build client");
    client.set_tools(vec![ToolSpec {
        name: "get_weather".to_string(),
        description: None,
        parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    }]);

    let items = ok_items(collect(&client, "What's the weather in Paris?").await);
    let expected = r#"TOOL_CALL: {"tool":"get_weather","tool_name":"get_weather","args":{"city":"Paris"},"arguments":{"city":"Paris"},"id":"call_1","tool_call_id":"call_1"}"#;
    assert_eq!(items.last().map(String::as_str), Some(expected));
    assert_eq!(items.iter().filter(|item| *item == expected).count(), 1);
    assert!(client.drain_buffered_tool_tokens().is_empty());

    let captured = captured.lock().expect("lock captured");
    let (headers, payload) = &captured[0];
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(headers["accept"], "text/event-stream");
    assert_eq!(payload["model"], "gpt-4o-mini");
    assert_eq!(payload["stream"], true);
    assert_eq!(
        payload["messages"],
        json!([{"role": "user", "content": "What's the weather in Paris?"}])
    );
    assert_eq!(payload["tools"][0]["function"]["name"], "get_weather");

    server.abort();
}

#[tokio::test]
async fn test_openai_chat_text_survives_keepalive_noise() {
    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "event: ping\n",
        "data: {this is not json\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"after done\"}}]}\n\n",
    );
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || async move { streaming_response("text/event-stream", body.to_string()) }),
    );
    let (base, server) = spawn_upstream(app).await;

    let client = client_for(format!("{base}/v1"), Dialect::OpenAiChat);
    let items = ok_items(collect(&client, "hi").await);
    assert_eq!(items, vec!["Hel".to_string(), "lo".to_string()]);

    server.abort();
}

#[tokio::test]
async fn test_cross_dialect_tool_call_equivalence() {
    let chat_body = sse(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ]);
    let ollama_body = ndjson(&[
        r#"{"model":"llama3","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"search","arguments":{"query":"x"}}}]},"done":false}"#,
        r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":10,"eval_count":5}"#,
    ]);
    let responses_body = concat!(
        "event: response.output_item.added\n",
        "data: {\"type\":\"response.output_item.added\",\"output_index\":0,\"item\":{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_r\",\"name\":\"search\",\"arguments\":\"\"}}\n\n",
        "event: response.function_call_arguments.delta\n",
        "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"fc_1\",\"output_index\":0,\"delta\":\"{\\\"query\\\":\"}\n\n",
        "event: response.function_call_arguments.done\n",
        "data: {\"type\":\"response.function_call_arguments.done\",\"item_id\":\"fc_1\",\"output_index\":0,\"arguments\":\"{\\\"query\\\":\\\"x\\\"}\"}\n\n",
        "event: response.completed\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"status\":\"completed\",\"usage\":{\"input_tokens\":4,\"output_tokens\":6,\"total_tokens\":10}}}\n\n",
    );

    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(move || async move { streaming_response("text/event-stream", chat_body.clone()) }),
        )
        .route(
            "/api/chat",
            post(move || async move { streaming_response("application/x-ndjson", ollama_body.clone()) }),
        )
        .route(
            "/v1/responses",
            post(move || async move {
                streaming_response("text/event-stream", responses_body.to_string())
            }),
        );
    let (base, server) = spawn_upstream(app).await;

    let expected = json!({
        "tool": "search",
        "tool_name": "search",
        "args": {"query": "x"},
        "arguments": {"query": "x"}
    });
    for (endpoint, dialect) in [
        (format!("{base}/v1"), Dialect::OpenAiChat),
        (base.clone(), Dialect::Ollama),
        (format!("{base}/v1"), Dialect::Responses),
    ] {
        let client = client_for(endpoint, dialect);
        client.set_tools(vec![search_tool()]);
        let items = ok_items(collect(&client, "find x").await);
        let snapshots = tool_snapshots(&items);
        let last = snapshots.last().cloned().expect("at least one tool token");
        assert_eq!(without_ids(last), expected, "dialect {dialect}");
        assert!(
            parse_tool_call_token(items.last().expect("items")).is_some(),
            "dialect {dialect} should end with a tool token"
        );
    }

    server.abort();
}

#[tokio::test]
async fn test_responses_call_id_becomes_tool_call_id() {
    let body = sse(&[
        r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
        r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"delta":"Looking"}"#,
        r#"{"type":"response.output_item.added","output_index":1,"item":{"type":"function_call","id":"fc_9","call_id":"call_9","name":"search","arguments":""}}"#,
        r#"{"type":"response.function_call_arguments.delta","item_id":"fc_9","output_index":1,"delta":"{\"query\":\"y\"}"}"#,
        r#"{"type":"response.output_item.done","output_index":1,"item":{"type":"function_call","id":"fc_9","call_id":"call_9","name":"search","arguments":"{\"query\":\"y\"}"}}"#,
        r#"{"type":"response.completed","response":{"status":"completed"}}"#,
    ]);
    let app = Router::new().route(
        "/v1/responses",
        post(move || async move { streaming_response("text/event-stream", body.clone()) }),
    );
    let (base, server) = spawn_upstream(app).await;

    let client = client_for(format!("{base}/v1"), Dialect::Responses);
    let items = ok_items(collect(&client, "find y").await);
    assert_eq!(items[0], "Looking");
    let snapshots = tool_snapshots(&items);
    let last = snapshots.last().expect("tool token");
    assert_eq!(last["tool_call_id"], "call_9");
    assert_eq!(last["args"], json!({"query": "y"}));
    // The done item repeats the delta's content, so no duplicate appears.
    let full = snapshots
        .iter()
        .filter(|s| s["args"] == json!({"query": "y"}))
        .count();
    assert_eq!(full, 1);

    server.abort();
}

#[tokio::test]
async fn test_completion_endpoint_streams_text_without_tools() {
    let captured = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let captured_clone = Arc::clone(&captured);
    let body = sse(&[
        r#"{"object":"text_completion","choices":[{"index":0,"text":"4","finish_reason":null}]}"#,
        r#"{"object":"text_completion","choices":[{"index":0,"text":".","finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);
    let app = Router::new().route(
        "/v1/completions",
        post(move |request: bytes::Bytes| {
            let captured = Arc::clone(&captured_clone);
            let body = body.clone();
            async move {
                let payload: serde_json::Value =
                    serde_json::from_slice(&request).expect("request json");
                captured.lock().expect("lock captured").push(payload);
                streaming_response("text/event-stream", body)
            }
        }),
    );
    let (base, server) = spawn_upstream(app).await;

    let client = client_for(format!("{base}/v1/completions"), Dialect::OpenAiChat);
    client.set_tools(vec![search_tool()]);
    client.set_options(RequestOptions {
        stop: vec!["\n".to_string()],
        ..RequestOptions::default()
    });
    let input = LlmInput::Messages(vec![ChatMessage::user("2+2?")]);
    let items = ok_items(collect(&client, input).await);
    assert_eq!(items, vec!["4".to_string(), ".".to_string()]);

    let captured = captured.lock().expect("lock captured");
    let payload = &captured[0];
    assert!(payload.get("tools").is_none());
    assert!(payload.get("messages").is_none());
    assert_eq!(payload["prompt"], "user: 2+2?\nassistant:");
    assert_eq!(payload["stop"], "\n");

    server.abort();
}

#[tokio::test]
async fn test_ollama_generate_endpoint() {
    let captured = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let captured_clone = Arc::clone(&captured);
    let body = ndjson(&[
        r#"{"model":"llama3","response":"Once","done":false}"#,
        r#"{"model":"llama3","response":" upon","done":false}"#,
        r#"{"model":"llama3","response":"","done":true,"done_reason":"stop","eval_count":2}"#,
    ]);
    let app = Router::new().route(
        "/api/generate",
        post(move |request: bytes::Bytes| {
            let captured = Arc::clone(&captured_clone);
            let body = body.clone();
            async move {
                let payload: serde_json::Value =
                    serde_json::from_slice(&request).expect("request json");
                captured.lock().expect("lock captured").push(payload);
                streaming_response("application/x-ndjson", body)
            }
        }),
    );
    let (base, server) = spawn_upstream(app).await;

    let mut backend =
        BackendDescriptor::new(format!("{base}/api/generate"), Dialect::Ollama).with_fallback_model("llama3");
    backend.keep_alive = Some("1m".to_string());
    let client = StreamingClient::for_backend(backend).expect("build client");
    let items = ok_items(collect(&client, "tell a story").await);
    assert_eq!(items, vec!["Once".to_string(), " upon".to_string()]);

    let captured = captured.lock().expect("lock captured");
    assert_eq!(captured[0]["prompt"], "tell a story");
    assert_eq!(captured[0]["keep_alive"], "1m");
    assert_eq!(captured[0]["model"], "llama3");

    server.abort();
}

#[tokio::test]
async fn test_ollama_final_line_without_newline() {
    let body = String::from(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"hi\"},\"done\":false}\n{\"message\":{\"content\":\"!\"},\"done\":true}",
    );
    let app = Router::new().route(
        "/api/chat",
        post(move || async move { streaming_response("application/x-ndjson", body.clone()) }),
    );
    let (base, server) = spawn_upstream(app).await;

    let client = client_for(base, Dialect::Ollama);
    let items = ok_items(collect(&client, "hey").await);
    assert_eq!(items, vec!["hi".to_string(), "!".to_string()]);

    server.abort();
}
