//! Legacy `/completions` request body. Streamed chunks share the chat chunk
//! shape (`choices[].text`) and are decoded by the chat decoder.

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::protocol::adapter::{encode_json, RequestContext};
use crate::protocol::openai_chat::{OpenAiStop, OpenAiStreamOptions};

/// `OpenAI` legacy completion request wire type. Tools are never attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompletionRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<OpenAiStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<OpenAiStop>,
}

#[must_use]
pub fn build_completion_request(ctx: &RequestContext<'_>) -> OpenAiCompletionRequest {
    OpenAiCompletionRequest {
        model: ctx.model.to_owned(),
        prompt: ctx.input.to_prompt(),
        stream: true,
        stream_options: Some(OpenAiStreamOptions {
            include_usage: true,
        }),
        temperature: ctx.options.temperature,
        top_p: ctx.options.top_p,
        max_tokens: ctx.options.max_tokens,
        stop: OpenAiStop::from_list(&ctx.options.stop),
    }
}

/// Encode the completion body.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] when serialization fails.
pub fn encode_completion_body(ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
    encode_json(&build_completion_request(ctx))
}
