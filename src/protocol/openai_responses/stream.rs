use smallvec::SmallVec;

use crate::error::ClientError;
use crate::protocol::canonical::Usage;
use crate::stream::{ChunkEvent, FragmentLocator, MergeMode, StreamEvent, ToolCallFragment};

use super::{ResponsesEnvelope, ResponsesErrorBody, ResponsesStreamEvent, ResponsesStreamItem};

const FUNCTION_CALL_ITEM: &str = "function_call";

/// Parse the JSON payload of one `data:` line.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the payload is not a typed event.
pub fn parse_responses_event(payload: &str) -> Result<ResponsesStreamEvent, ClientError> {
    serde_json::from_str(payload).map_err(|e| ClientError::MalformedEvent(e.to_string()))
}

/// Decode one Responses event payload.
///
/// # Errors
///
/// Returns [`ClientError::MalformedEvent`] when the payload does not parse.
pub fn decode_responses_payload(payload: &str) -> Result<Option<StreamEvent>, ClientError> {
    parse_responses_event(payload).map(decode_responses_stream_event)
}

/// Normalize a parsed event.
///
/// Tool-call events are keyed by item identifiers: `output_item.added`
/// introduces the item id, call id and output index together, and later
/// argument events reference the item id or the output index.
#[must_use]
pub fn decode_responses_stream_event(event: ResponsesStreamEvent) -> Option<StreamEvent> {
    match event {
        ResponsesStreamEvent::OutputTextDelta { delta } => (!delta.is_empty()).then(|| {
            StreamEvent::Chunk(ChunkEvent {
                text: Some(delta),
                ..ChunkEvent::default()
            })
        }),
        ResponsesStreamEvent::OutputItemAdded { output_index, item }
        | ResponsesStreamEvent::OutputItemDone { output_index, item } => {
            function_call_item(output_index, item)
        }
        ResponsesStreamEvent::FunctionCallArgumentsDelta {
            item_id,
            call_id,
            output_index,
            delta,
        } => Some(StreamEvent::ToolCall(ToolCallFragment {
            locator: item_locator([item_id, call_id], output_index),
            id: None,
            name: None,
            arguments: Some(delta),
            mode: MergeMode::Append,
        })),
        ResponsesStreamEvent::FunctionCallArgumentsDone {
            item_id,
            call_id,
            output_index,
            name,
            arguments,
        } => Some(StreamEvent::ToolCall(ToolCallFragment {
            locator: item_locator([item_id, call_id], output_index),
            id: None,
            name,
            mode: MergeMode::Replace,
            arguments,
        })),
        ResponsesStreamEvent::Completed { response } => Some(StreamEvent::Completed {
            usage: envelope_usage(response.as_ref()),
        }),
        ResponsesStreamEvent::Incomplete { response } => {
            tracing::warn!(
                status = response.as_ref().and_then(|r| r.status.as_deref()),
                "response ended incomplete"
            );
            Some(StreamEvent::Completed {
                usage: envelope_usage(response.as_ref()),
            })
        }
        ResponsesStreamEvent::Failed { response } => Some(StreamEvent::Failed(
            response
                .and_then(|r| r.error)
                .map_or_else(|| "response failed".to_string(), |e| e.describe()),
        )),
        ResponsesStreamEvent::ResponseError {
            code,
            message,
            error,
        }
        | ResponsesStreamEvent::Error {
            code,
            message,
            error,
        } => Some(StreamEvent::Failed(
            error
                .unwrap_or(ResponsesErrorBody { code, message })
                .describe(),
        )),
        ResponsesStreamEvent::Unknown => None,
    }
}

fn function_call_item(output_index: Option<u32>, item: ResponsesStreamItem) -> Option<StreamEvent> {
    if item.type_ != FUNCTION_CALL_ITEM {
        return None;
    }
    let ResponsesStreamItem {
        id,
        call_id,
        name,
        arguments,
        ..
    } = item;
    let tool_call_id = call_id.clone().or_else(|| id.clone());
    Some(StreamEvent::ToolCall(ToolCallFragment {
        locator: item_locator([id, call_id], output_index),
        id: tool_call_id,
        name,
        arguments: arguments.filter(|a| !a.is_empty()),
        mode: MergeMode::Replace,
    }))
}

fn item_locator(ids: [Option<String>; 2], output_index: Option<u32>) -> FragmentLocator {
    let mut keys: SmallVec<[String; 3]> = ids.into_iter().flatten().collect();
    if let Some(index) = output_index {
        keys.push(format!("#{index}"));
    }
    FragmentLocator::Item(keys)
}

fn envelope_usage(response: Option<&ResponsesEnvelope>) -> Option<Usage> {
    let usage = response?.usage.as_ref()?;
    Some(Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    })
}
