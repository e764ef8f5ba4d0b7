use crate::error::ClientError;
use crate::protocol::adapter::{encode_json, RequestContext};
use crate::protocol::canonical::{ChatMessage, Role, ToolSpec};

use super::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStop, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
    OpenAiToolCallFunction, OpenAiToolFunction,
};

/// Build the streaming Chat Completions request.
#[must_use]
pub fn build_openai_chat_request(ctx: &RequestContext<'_>) -> OpenAiChatRequest {
    let messages = ctx
        .input
        .to_messages()
        .iter()
        .map(encode_message)
        .collect();
    let tools = (!ctx.tools.is_empty()).then(|| ctx.tools.iter().map(encode_tool).collect());

    OpenAiChatRequest {
        model: ctx.model.to_owned(),
        messages,
        stream: true,
        stream_options: Some(OpenAiStreamOptions {
            include_usage: true,
        }),
        tools,
        temperature: ctx.options.temperature,
        top_p: ctx.options.top_p,
        max_tokens: ctx.options.max_tokens,
        stop: OpenAiStop::from_list(&ctx.options.stop),
    }
}

/// Encode the Chat Completions body.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] when serialization fails.
pub fn encode_chat_body(ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
    encode_json(&build_openai_chat_request(ctx))
}

fn encode_message(message: &ChatMessage) -> OpenAiMessage {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                type_: "function".to_string(),
                function: OpenAiToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect::<Vec<_>>()
    });
    // Assistant turns that only call tools carry `content: null`.
    let content = if message.role == Role::Assistant
        && message.content.is_empty()
        && tool_calls.is_some()
    {
        None
    } else {
        Some(message.content.clone())
    };
    OpenAiMessage {
        role: message.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn encode_tool(tool: &ToolSpec) -> OpenAiTool {
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}
