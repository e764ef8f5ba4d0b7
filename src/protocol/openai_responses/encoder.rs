use crate::error::ClientError;
use crate::protocol::adapter::{encode_json, RequestContext};
use crate::protocol::canonical::{LlmInput, Role};

use super::{ResponsesInput, ResponsesInputItem, ResponsesRequest, ResponsesTool};

/// Build the streaming Responses request. System messages move to
/// `instructions`; stop sequences have no Responses equivalent.
#[must_use]
pub fn build_responses_request(ctx: &RequestContext<'_>) -> ResponsesRequest {
    if !ctx.options.stop.is_empty() {
        tracing::debug!("responses dialect has no stop sequences; ignoring them");
    }

    let (input, instructions) = match ctx.input {
        LlmInput::Prompt(prompt) => (ResponsesInput::Text(prompt.clone()), None),
        LlmInput::Messages(messages) => {
            let mut instructions: Vec<&str> = Vec::new();
            let mut items = Vec::with_capacity(messages.len());
            for message in messages {
                match message.role {
                    Role::System => instructions.push(&message.content),
                    Role::Tool => items.push(ResponsesInputItem::FunctionCallOutput {
                        call_id: message.tool_call_id.clone().unwrap_or_default(),
                        output: message.content.clone(),
                    }),
                    Role::User | Role::Assistant => {
                        if !message.content.is_empty() || message.tool_calls.is_empty() {
                            items.push(ResponsesInputItem::Message {
                                role: message.role.as_str().to_string(),
                                content: message.content.clone(),
                            });
                        }
                        items.extend(message.tool_calls.iter().map(|call| {
                            ResponsesInputItem::FunctionCall {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            }
                        }));
                    }
                }
            }
            let instructions = (!instructions.is_empty()).then(|| instructions.join("\n\n"));
            (ResponsesInput::Items(items), instructions)
        }
    };

    let tools = (!ctx.tools.is_empty()).then(|| {
        ctx.tools
            .iter()
            .map(|tool| ResponsesTool {
                type_: "function".to_string(),
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect()
    });

    ResponsesRequest {
        model: ctx.model.to_owned(),
        input,
        instructions,
        tools,
        stream: true,
        temperature: ctx.options.temperature,
        top_p: ctx.options.top_p,
        max_output_tokens: ctx.options.max_tokens,
    }
}

/// Encode the Responses body.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] when serialization fails.
pub fn encode_responses_body(ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
    encode_json(&build_responses_request(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendDescriptor, RequestOptions};
    use crate::protocol::canonical::{
        AssistantToolCall, ChatMessage, Dialect, EndpointKind, ToolSpec,
    };
    use serde_json::json;

    fn encode(input: &LlmInput, tools: &[ToolSpec]) -> serde_json::Value {
        let backend = BackendDescriptor::new("https://api.example.com/v1", Dialect::Responses);
        let options = RequestOptions {
            max_tokens: Some(100),
            stop: vec!["x".to_string()],
            ..RequestOptions::default()
        };
        let ctx = RequestContext {
            backend: &backend,
            model: "gpt-4.1",
            input,
            options: &options,
            tools,
            endpoint_kind: EndpointKind::Chat,
        };
        serde_json::from_slice(&encode_responses_body(&ctx).unwrap()).unwrap()
    }

    #[test]
    fn test_prompt_is_plain_input() {
        let body = encode(&LlmInput::from("hello"), &[]);
        assert_eq!(body["input"], "hello");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_output_tokens"], 100);
        assert!(body.get("stop").is_none());
        assert!(body.get("instructions").is_none());
    }

    #[test]
    fn test_messages_become_items_and_instructions() {
        let mut assistant = ChatMessage::assistant("");
        assistant.tool_calls.push(AssistantToolCall {
            id: "call_9".to_string(),
            name: "search".to_string(),
            arguments: "{}".to_string(),
        });
        let input = LlmInput::Messages(vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("look it up"),
            assistant,
            ChatMessage::tool_result("call_9", "result"),
        ]);
        let tools = [ToolSpec {
            name: "search".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }];
        let body = encode(&input, &tools);
        assert_eq!(body["instructions"], "be terse");
        assert_eq!(
            body["input"],
            json!([
                {"type": "message", "role": "user", "content": "look it up"},
                {"type": "function_call", "call_id": "call_9", "name": "search", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_9", "output": "result"}
            ])
        );
        assert_eq!(body["tools"][0], json!({"type": "function", "name": "search", "parameters": {"type": "object"}}));
    }
}
