pub mod accumulator;
pub mod lines;

pub use accumulator::{AccumulatorKey, ToolCallAccumulator, ToolCallTracker};
pub use lines::line_stream;

use smallvec::SmallVec;

use crate::error::ClientError;
use crate::protocol::adapter::{adapter_for, LineKind};
use crate::protocol::canonical::{Dialect, FinishReason, Usage};

/// Prefix marking a tool-call token in the output sequence.
pub const TOOL_CALL_PREFIX: &str = "TOOL_CALL: ";

/// Build the output token for a tool-call snapshot.
#[must_use]
pub fn tool_call_token(snapshot_json: &str) -> String {
    let mut out = String::with_capacity(TOOL_CALL_PREFIX.len() + snapshot_json.len());
    out.push_str(TOOL_CALL_PREFIX);
    out.push_str(snapshot_json);
    out
}

/// Whether an output item is a tool-call token; returns the JSON part.
#[must_use]
pub fn parse_tool_call_token(item: &str) -> Option<&str> {
    item.strip_prefix(TOOL_CALL_PREFIX)
}

/// How a fragment's argument text combines with what is already buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Streaming deltas: append to the buffer.
    Append,
    /// Whole-message payloads: the fragment is the full argument text.
    Replace,
}

/// Identifies which in-flight tool call a fragment belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentLocator {
    /// Chunk-reported index (Chat Completions, Ollama).
    Index(u32),
    /// Item / call identifiers (Responses). Any id already bound to a key
    /// resolves to that key; every listed id is bound to the resolved key.
    Item(SmallVec<[String; 3]>),
}

/// A partial or whole tool call decoded from one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub locator: FragmentLocator,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub mode: MergeMode,
}

/// Everything a single chunk line can carry at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkEvent {
    pub text: Option<String>,
    pub tool_calls: SmallVec<[ToolCallFragment; 1]>,
    pub finish: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// The line itself ends the stream (Ollama `done: true`).
    pub terminal: bool,
}

impl ChunkEvent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.tool_calls.is_empty()
            && self.finish.is_none()
            && self.usage.is_none()
            && !self.terminal
    }
}

/// A normalized event decoded from one wire line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text and/or indexed tool-call fragments and/or a finish reason.
    Chunk(ChunkEvent),
    /// An item-keyed tool-call event (Responses).
    ToolCall(ToolCallFragment),
    /// Normal end of the response.
    Completed { usage: Option<Usage> },
    /// The backend reported an error in-band.
    Failed(String),
}

/// Decode the payload of one line for `dialect`.
///
/// `Ok(None)` means the payload was well-formed but carries nothing of
/// interest.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the payload is not valid JSON
/// of the expected shape.
pub fn decode_payload(dialect: Dialect, payload: &str) -> Result<Option<StreamEvent>, ClientError> {
    adapter_for(dialect).decode_payload(payload)
}

/// Classify and decode one raw line.
///
/// Returns `None` for blank lines, SSE comments and non-data fields, the
/// `[DONE]` sentinel, and lines that fail to decode.
#[must_use]
pub fn decode_line(dialect: Dialect, line: &str) -> Option<StreamEvent> {
    match adapter_for(dialect).classify_line(line) {
        LineKind::Payload(payload) => match decode_payload(dialect, payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(%dialect, error = %err, "skipping undecodable line");
                None
            }
        },
        LineKind::Done | LineKind::Ignorable => None,
    }
}
