use rustc_hash::FxHashMap;

use crate::error::ClientError;
use crate::protocol::adapter::{encode_json, RequestContext};
use crate::protocol::canonical::{ChatMessage, EndpointKind, Role};
use crate::stream::accumulator::canonical_arguments;

use super::{
    OllamaChatRequest, OllamaFunctionCall, OllamaGenerateRequest, OllamaMessage, OllamaOptions,
    OllamaTool, OllamaToolCall, OllamaToolFunction,
};

/// Encode an `/api/chat` or `/api/generate` body depending on the endpoint.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] when serialization fails.
pub fn encode_ollama_body(ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
    match ctx.endpoint_kind {
        EndpointKind::Chat => encode_json(&build_ollama_chat_request(ctx)),
        EndpointKind::Completion => encode_json(&build_ollama_generate_request(ctx)),
    }
}

#[must_use]
pub fn build_ollama_chat_request(ctx: &RequestContext<'_>) -> OllamaChatRequest {
    let tools = (!ctx.tools.is_empty()).then(|| {
        ctx.tools
            .iter()
            .map(|tool| OllamaTool {
                type_: "function".to_string(),
                function: OllamaToolFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    });
    OllamaChatRequest {
        model: ctx.model.to_owned(),
        messages: encode_messages(&ctx.input.to_messages()),
        stream: true,
        tools,
        options: encode_options(ctx),
        keep_alive: ctx.backend.keep_alive.clone(),
    }
}

#[must_use]
pub fn build_ollama_generate_request(ctx: &RequestContext<'_>) -> OllamaGenerateRequest {
    OllamaGenerateRequest {
        model: ctx.model.to_owned(),
        prompt: ctx.input.to_prompt(),
        stream: true,
        options: encode_options(ctx),
        keep_alive: ctx.backend.keep_alive.clone(),
    }
}

fn encode_options(ctx: &RequestContext<'_>) -> Option<OllamaOptions> {
    let options = OllamaOptions {
        temperature: ctx.options.temperature,
        top_p: ctx.options.top_p,
        num_predict: ctx.options.max_tokens,
        stop: (!ctx.options.stop.is_empty()).then(|| ctx.options.stop.clone()),
    };
    (options != OllamaOptions::default()).then_some(options)
}

/// Tool results carry `tool_name`, resolved from the assistant call with the
/// same id earlier in the history.
fn encode_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    let mut call_names: FxHashMap<&str, &str> = FxHashMap::default();
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        for call in &message.tool_calls {
            call_names.insert(call.id.as_str(), call.name.as_str());
        }
        let tool_name = match (message.role, message.tool_call_id.as_deref()) {
            (Role::Tool, Some(id)) => call_names.get(id).map(|name| (*name).to_string()),
            _ => None,
        };
        out.push(encode_message(message, tool_name));
    }
    out
}

fn encode_message(message: &ChatMessage, tool_name: Option<String>) -> OllamaMessage {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| OllamaToolCall {
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                function: OllamaFunctionCall {
                    name: call.name.clone(),
                    arguments: canonical_arguments(&call.arguments),
                },
            })
            .collect()
    });
    OllamaMessage {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
        tool_calls,
        tool_name,
        tool_call_id: message.tool_call_id.clone(),
    }
}
