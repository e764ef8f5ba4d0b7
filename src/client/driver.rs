use crate::error::ClientError;
use crate::protocol::adapter::{adapter_for, DialectAdapter, LineKind};
use crate::protocol::canonical::{Dialect, FinishReason, Usage};
use crate::stream::{tool_call_token, StreamEvent, ToolCallFragment, ToolCallTracker};

/// One item for the output sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Emission {
    Text(String),
    ToolCall(String),
}

/// What the stream loop should do after a line.
#[derive(Debug)]
pub(crate) enum LineOutcome {
    Continue,
    /// Terminal signal seen (`[DONE]`, `done: true`, `response.completed`).
    Finished,
    Failed(ClientError),
}

/// Per-stream decoding state: turns raw lines into emissions.
///
/// Owned by exactly one stream task; no locking.
pub(crate) struct StreamDriver {
    adapter: &'static dyn DialectAdapter,
    tracker: ToolCallTracker,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    skipped_lines: u64,
}

impl StreamDriver {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            adapter: adapter_for(dialect),
            tracker: ToolCallTracker::new(),
            finish: None,
            usage: None,
            skipped_lines: 0,
        }
    }

    pub(crate) fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub(crate) fn tool_call_count(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub(crate) fn handle_line(&mut self, line: &str, out: &mut Vec<Emission>) -> LineOutcome {
        let payload = match self.adapter.classify_line(line) {
            LineKind::Ignorable => return LineOutcome::Continue,
            LineKind::Done => return LineOutcome::Finished,
            LineKind::Payload(payload) => payload,
        };
        match self.adapter.decode_payload(payload) {
            Ok(Some(event)) => self.apply(event, out),
            Ok(None) => LineOutcome::Continue,
            Err(err) => {
                self.skipped_lines += 1;
                tracing::debug!(
                    dialect = %self.adapter.dialect(),
                    error = %err,
                    "skipping undecodable line"
                );
                LineOutcome::Continue
            }
        }
    }

    fn apply(&mut self, event: StreamEvent, out: &mut Vec<Emission>) -> LineOutcome {
        match event {
            StreamEvent::Chunk(chunk) => {
                if let Some(text) = chunk.text {
                    out.push(Emission::Text(text));
                }
                for fragment in chunk.tool_calls {
                    self.ingest(fragment, out);
                }
                if chunk.usage.is_some() {
                    self.usage = chunk.usage;
                }
                if chunk.finish.is_some() {
                    self.finish = chunk.finish;
                }
                // The model has stopped to call tools: surface every tracked
                // call now so a body that breaks before `[DONE]` loses none.
                if chunk.finish == Some(FinishReason::ToolCalls) {
                    self.flush_tool_calls(out);
                }
                if chunk.terminal {
                    LineOutcome::Finished
                } else {
                    LineOutcome::Continue
                }
            }
            StreamEvent::ToolCall(fragment) => {
                self.ingest(fragment, out);
                LineOutcome::Continue
            }
            StreamEvent::Completed { usage } => {
                if usage.is_some() {
                    self.usage = usage;
                }
                LineOutcome::Finished
            }
            StreamEvent::Failed(message) => LineOutcome::Failed(ClientError::Remote(message)),
        }
    }

    fn ingest(&mut self, fragment: ToolCallFragment, out: &mut Vec<Emission>) {
        if let Some(snapshot) = self.tracker.ingest(fragment) {
            out.push(Emission::ToolCall(tool_call_token(&snapshot)));
        }
    }

    /// Final forced-emission pass on successful completion, in key order.
    /// Runs when calls are tracked or the backend said it stopped for tools.
    pub(crate) fn finish(&mut self, out: &mut Vec<Emission>) {
        if self.tracker.is_empty() && self.finish != Some(FinishReason::ToolCalls) {
            return;
        }
        self.flush_tool_calls(out);
    }

    fn flush_tool_calls(&mut self, out: &mut Vec<Emission>) {
        out.extend(
            self.tracker
                .finish()
                .into_iter()
                .map(|snapshot| Emission::ToolCall(tool_call_token(&snapshot))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(dialect: Dialect, lines: &[&str]) -> (Vec<Emission>, Option<LineOutcome>) {
        let mut driver = StreamDriver::new(dialect);
        let mut out = Vec::new();
        for line in lines {
            match driver.handle_line(line, &mut out) {
                LineOutcome::Continue => {}
                LineOutcome::Finished => {
                    driver.finish(&mut out);
                    return (out, Some(LineOutcome::Finished));
                }
                failed @ LineOutcome::Failed(_) => return (out, Some(failed)),
            }
        }
        driver.finish(&mut out);
        (out, None)
    }

    fn tool_tokens(out: &[Emission]) -> Vec<serde_json::Value> {
        out.iter()
            .filter_map(|e| match e {
                Emission::ToolCall(token) => Some(
                    serde_json::from_str(token.strip_prefix("TOOL_CALL: ").unwrap()).unwrap(),
                ),
                Emission::Text(_) => None,
            })
            .collect()
    }

    const WEATHER_EXPECTED: &str = r#"TOOL_CALL: {"tool":"get_weather","tool_name":"get_weather","args":{"city":"Paris"},"arguments":{"city":"Paris"},"id":"call_1","tool_call_id":"call_1"}"#;

    #[test]
    fn test_weather_example_ends_with_one_full_tool_call() {
        let (out, outcome) = run(
            Dialect::OpenAiChat,
            &[
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]},"finish_reason":"tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        assert!(matches!(outcome, Some(LineOutcome::Finished)));
        assert_eq!(out.last(), Some(&Emission::ToolCall(WEATHER_EXPECTED.to_string())));
        let full = out
            .iter()
            .filter(|e| **e == Emission::ToolCall(WEATHER_EXPECTED.to_string()))
            .count();
        assert_eq!(full, 1);
    }

    #[test]
    fn test_text_passes_through_in_order() {
        let (out, _) = run(
            Dialect::OpenAiChat,
            &[
                ": keep-alive",
                r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
                "data: {garbage",
                r#"data: {"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(
            out,
            vec![Emission::Text("Hel".to_string()), Emission::Text("lo".to_string())]
        );
    }

    #[test]
    fn test_ollama_done_line_terminates() {
        let (out, outcome) = run(
            Dialect::Ollama,
            &[
                r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"search","arguments":{"query":"x"}}}]},"done":false}"#,
                r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
                r#"{"message":{"content":"after done"},"done":false}"#,
            ],
        );
        assert!(matches!(outcome, Some(LineOutcome::Finished)));
        let tools = tool_tokens(&out);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["tool"], "search");
        assert_eq!(tools[0]["args"], serde_json::json!({"query": "x"}));
        assert!(!out.contains(&Emission::Text("after done".to_string())));
    }

    #[test]
    fn test_responses_error_fails_stream() {
        let (_, outcome) = run(
            Dialect::Responses,
            &[
                r#"data: {"type":"response.output_text.delta","delta":"partial"}"#,
                r#"data: {"type":"response.error","message":"quota exceeded"}"#,
            ],
        );
        match outcome {
            Some(LineOutcome::Failed(ClientError::Remote(message))) => {
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected remote failure, got {other:?}"),
        }
    }

    #[test]
    fn test_nameless_call_is_forced_at_end_of_input() {
        let (out, outcome) = run(
            Dialect::OpenAiChat,
            &[r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]}}]}"#],
        );
        assert!(outcome.is_none());
        let tools = tool_tokens(&out);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["tool"], "");
    }

    #[test]
    fn test_tool_calls_finish_reason_flushes_held_calls() {
        let mut driver = StreamDriver::new(Dialect::OpenAiChat);
        let mut out = Vec::new();
        let outcome = driver.handle_line(
            r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1}"}}]}}]}"#,
            &mut out,
        );
        assert!(matches!(outcome, LineOutcome::Continue));
        assert!(out.is_empty());

        driver.handle_line(
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            &mut out,
        );
        let tools = tool_tokens(&out);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["args"], serde_json::json!({"a": 1}));

        // `[DONE]` afterwards does not repeat the call.
        out.clear();
        assert!(matches!(driver.handle_line("data: [DONE]", &mut out), LineOutcome::Finished));
        driver.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_usage_is_kept_from_final_chunk() {
        let mut driver = StreamDriver::new(Dialect::OpenAiChat);
        let mut out = Vec::new();
        driver.handle_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":2,"completion_tokens":3,"total_tokens":5}}"#,
            &mut out,
        );
        assert_eq!(driver.usage().and_then(|u| u.total()), Some(5));
        assert!(out.is_empty());
    }
}
