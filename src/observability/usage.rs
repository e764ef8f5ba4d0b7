use std::time::Duration;

use tracing::info;

use crate::protocol::canonical::{Dialect, Usage};

/// What one finished stream reports in its completion log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub dialect: Dialect,
    pub model: String,
    pub usage: Option<Usage>,
    pub tool_calls: usize,
    pub buffered_tool_tokens: usize,
}

/// Log token usage for a completed stream at INFO level.
///
/// Missing counts are logged as 0; the total falls back to input + output.
pub fn log_stream_complete(summary: &StreamSummary, elapsed: Duration) {
    let usage = summary.usage.unwrap_or_default();
    info!(
        dialect = %summary.dialect,
        model = %summary.model,
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total().unwrap_or(0),
        tool_calls = summary.tool_calls,
        buffered_tool_tokens = summary.buffered_tool_tokens,
        duration_seconds = elapsed.as_secs_f64(),
        "stream completed"
    );
}
