use crate::error::ClientError;
use crate::protocol::canonical::{FinishReason, Usage};
use crate::stream::{ChunkEvent, FragmentLocator, MergeMode, StreamEvent, ToolCallFragment};

use super::OllamaStreamLine;

/// Parse one NDJSON line.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the line is not a JSON object.
pub fn parse_ollama_line(line: &str) -> Result<OllamaStreamLine, ClientError> {
    serde_json::from_str(line).map_err(|e| ClientError::MalformedEvent(e.to_string()))
}

/// Decode one NDJSON line.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the line does not parse.
pub fn decode_ollama_line(line: &str) -> Result<Option<StreamEvent>, ClientError> {
    parse_ollama_line(line).map(decode_ollama_stream_line)
}

/// Normalize a parsed line. Ollama sends whole tool calls (arguments as a
/// complete object), so fragments replace rather than append.
#[must_use]
pub fn decode_ollama_stream_line(line: OllamaStreamLine) -> Option<StreamEvent> {
    if let Some(error) = line.error {
        return Some(StreamEvent::Failed(error));
    }

    let mut event = ChunkEvent::default();
    let mut text = String::new();
    if let Some(response) = line.response {
        text.push_str(&response);
    }
    if let Some(message) = line.message {
        if let Some(content) = message.content {
            text.push_str(&content);
        }
        for (position, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let Some(function) = call.function else {
                continue;
            };
            let index = function
                .index
                .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
            event.tool_calls.push(ToolCallFragment {
                locator: FragmentLocator::Index(index),
                id: call.id,
                name: function.name,
                arguments: function.arguments.map(|a| a.into_text()),
                mode: MergeMode::Replace,
            });
        }
    }
    if !text.is_empty() {
        event.text = Some(text);
    }

    if line.done {
        event.terminal = true;
        event.finish = Some(
            line.done_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::from_wire),
        );
        if line.prompt_eval_count.is_some() || line.eval_count.is_some() {
            event.usage = Some(Usage {
                input_tokens: line.prompt_eval_count,
                output_tokens: line.eval_count,
                total_tokens: None,
            });
        }
    }

    (!event.is_empty()).then_some(StreamEvent::Chunk(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(line: &str) -> ChunkEvent {
        match decode_ollama_line(line).unwrap() {
            Some(StreamEvent::Chunk(chunk)) => chunk,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_chat_text() {
        let event = chunk(
            r#"{"model":"llama3","created_at":"2024-01-01T00:00:00Z","message":{"role":"assistant","content":"Hi"},"done":false}"#,
        );
        assert_eq!(event.text.as_deref(), Some("Hi"));
        assert!(!event.terminal);
    }

    #[test]
    fn test_decode_generate_text() {
        let event = chunk(r#"{"model":"llama3","response":"Once","done":false}"#);
        assert_eq!(event.text.as_deref(), Some("Once"));
    }

    #[test]
    fn test_decode_tool_call_object_arguments() {
        let event = chunk(
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"search","arguments":{"query":"x"}}}]},"done":false}"#,
        );
        assert!(event.text.is_none());
        let fragment = &event.tool_calls[0];
        assert_eq!(fragment.locator, FragmentLocator::Index(0));
        assert_eq!(fragment.name.as_deref(), Some("search"));
        assert_eq!(fragment.arguments.as_deref(), Some("{\"query\":\"x\"}"));
        assert_eq!(fragment.mode, MergeMode::Replace);
    }

    #[test]
    fn test_decode_explicit_function_index() {
        let event = chunk(
            r#"{"message":{"tool_calls":[{"function":{"index":3,"name":"a","arguments":{}}}]},"done":false}"#,
        );
        assert_eq!(event.tool_calls[0].locator, FragmentLocator::Index(3));
    }

    #[test]
    fn test_decode_done_line() {
        let event = chunk(
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"length","prompt_eval_count":10,"eval_count":4}"#,
        );
        assert!(event.terminal);
        assert_eq!(event.finish, Some(FinishReason::Length));
        let usage = event.usage.unwrap();
        assert_eq!(usage.total(), Some(14));

        let event = chunk(r#"{"done":true}"#);
        assert_eq!(event.finish, Some(FinishReason::Stop));
        assert!(event.usage.is_none());
    }

    #[test]
    fn test_decode_error_line() {
        assert_eq!(
            decode_ollama_line(r#"{"error":"model not found"}"#).unwrap(),
            Some(StreamEvent::Failed("model not found".to_string()))
        );
    }

    #[test]
    fn test_decode_empty_line_object() {
        assert!(decode_ollama_line(r#"{"message":{"content":""},"done":false}"#)
            .unwrap()
            .is_none());
    }
}
