use smallvec::SmallVec;

use crate::error::ClientError;
use crate::protocol::canonical::{FinishReason, Usage};
use crate::stream::{ChunkEvent, FragmentLocator, MergeMode, StreamEvent, ToolCallFragment};

use super::{OpenAiDelta, OpenAiStreamChunk, OpenAiUsage};

/// Parse the JSON payload of one `data:` line.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the payload is not a chunk object.
pub fn parse_openai_chunk(payload: &str) -> Result<OpenAiStreamChunk, ClientError> {
    serde_json::from_str(payload).map_err(|e| ClientError::MalformedEvent(e.to_string()))
}

/// Decode one Chat Completions (or legacy completion) payload.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the payload does not parse.
pub fn decode_openai_payload(payload: &str) -> Result<Option<StreamEvent>, ClientError> {
    parse_openai_chunk(payload).map(decode_openai_stream_chunk)
}

/// Normalize a parsed chunk. All choices are folded into one event so text,
/// tool-call fragments and the finish reason of a single line stay together.
#[must_use]
pub fn decode_openai_stream_chunk(chunk: OpenAiStreamChunk) -> Option<StreamEvent> {
    if let Some(error) = chunk.error {
        return Some(StreamEvent::Failed(error.describe()));
    }

    let mut event = ChunkEvent::default();
    for choice in chunk.choices {
        if let Some(text) = choice.text {
            push_text(&mut event, text);
        }
        if let Some(delta) = choice.delta {
            push_delta(&mut event, delta, MergeMode::Append);
        }
        if let Some(message) = choice.message {
            push_delta(&mut event, message, MergeMode::Replace);
        }
        if let Some(reason) = choice.finish_reason {
            event.finish = Some(FinishReason::from_wire(&reason));
        }
    }
    event.usage = chunk.usage.map(usage_from_wire);

    (!event.is_empty()).then_some(StreamEvent::Chunk(event))
}

fn push_text(event: &mut ChunkEvent, text: String) {
    if text.is_empty() {
        return;
    }
    match event.text.as_mut() {
        Some(existing) => existing.push_str(&text),
        None => event.text = Some(text),
    }
}

fn push_delta(event: &mut ChunkEvent, delta: OpenAiDelta, mode: MergeMode) {
    if let Some(content) = delta.content {
        push_text(event, content);
    }
    let Some(tool_calls) = delta.tool_calls else {
        return;
    };
    let mut fragments: SmallVec<[ToolCallFragment; 1]> = SmallVec::with_capacity(tool_calls.len());
    for (position, call) in tool_calls.into_iter().enumerate() {
        let index = call
            .index
            .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
        let (name, arguments) = match call.function {
            Some(function) => (function.name, function.arguments.map(|a| a.into_text())),
            None => (None, None),
        };
        fragments.push(ToolCallFragment {
            locator: FragmentLocator::Index(index),
            id: call.id,
            name,
            arguments,
            mode,
        });
    }
    event.tool_calls.extend(fragments);
}

fn usage_from_wire(usage: OpenAiUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}
