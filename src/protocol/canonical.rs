use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire dialect spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Dialect {
    #[default]
    #[serde(rename = "openai-chat")]
    OpenAiChat,
    #[serde(rename = "openai-completion")]
    OpenAiCompletion,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "responses")]
    Responses,
}

impl Dialect {
    /// Route appended to a bare base URL when the endpoint names no route.
    #[must_use]
    pub const fn default_route(self) -> &'static str {
        match self {
            Dialect::OpenAiChat => "/chat/completions",
            Dialect::OpenAiCompletion => "/completions",
            Dialect::Ollama => "/api/chat",
            Dialect::Responses => "/responses",
        }
    }

    /// SSE-framed dialects carry payload on `data:` lines; NDJSON dialects
    /// carry one JSON object per line.
    #[must_use]
    pub const fn is_sse(self) -> bool {
        !matches!(self, Dialect::Ollama)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::OpenAiChat => write!(f, "openai-chat"),
            Dialect::OpenAiCompletion => write!(f, "openai-completion"),
            Dialect::Ollama => write!(f, "ollama"),
            Dialect::Responses => write!(f, "responses"),
        }
    }
}

/// Whether a resolved endpoint speaks a chat (messages) or legacy
/// completion (prompt) body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Chat,
    Completion,
}

impl EndpointKind {
    /// Classify a request path by looking for chat-like path segments.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let chat_like = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .any(|segment| matches!(segment, "chat" | "responses" | "messages"));
        if chat_like {
            EndpointKind::Chat
        } else {
            EndpointKind::Completion
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool call previously made by the assistant, replayed in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text.
    pub arguments: String,
}

/// One message of a structured conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<AssistantToolCall>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Input of one stream invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmInput {
    Prompt(String),
    Messages(Vec<ChatMessage>),
}

impl LlmInput {
    /// Messages view; a bare prompt becomes a single user message.
    #[must_use]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            LlmInput::Prompt(prompt) => vec![ChatMessage::user(prompt.clone())],
            LlmInput::Messages(messages) => messages.clone(),
        }
    }

    /// Prompt view for completion-shaped endpoints. Messages are flattened
    /// one per line as `role: content`, followed by an open assistant turn.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        match self {
            LlmInput::Prompt(prompt) => prompt.clone(),
            LlmInput::Messages(messages) => {
                let mut out = String::new();
                for message in messages {
                    out.push_str(message.role.as_str());
                    out.push_str(": ");
                    out.push_str(&message.content);
                    out.push('\n');
                }
                out.push_str("assistant:");
                out
            }
        }
    }
}

impl From<&str> for LlmInput {
    fn from(prompt: &str) -> Self {
        LlmInput::Prompt(prompt.to_owned())
    }
}

impl From<String> for LlmInput {
    fn from(prompt: String) -> Self {
        LlmInput::Prompt(prompt)
    }
}

impl From<Vec<ChatMessage>> for LlmInput {
    fn from(messages: Vec<ChatMessage>) -> Self {
        LlmInput::Messages(messages)
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema object describing the arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other,
}

impl FinishReason {
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "eos" => FinishReason::Stop,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

/// Token usage as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or_else(|| match (self.input_tokens, self.output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        })
    }
}
