use crate::config::{BackendDescriptor, RequestOptions};
use crate::error::ClientError;
use crate::protocol::canonical::{Dialect, EndpointKind, LlmInput, ToolSpec};
use crate::protocol::{ollama, openai_chat, openai_completion, openai_responses};
use crate::stream::StreamEvent;
use crate::util::{extract_sse_data_payload, is_done_sentinel};

/// Routes recognised at the end of a configured endpoint path.
const KNOWN_ROUTES: &[&str] = &[
    "/chat/completions",
    "/completions",
    "/responses",
    "/api/chat",
    "/api/generate",
];

/// How one raw line should be treated, decided by dialect alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// JSON payload to decode (SSE `data:` stripped, or a whole NDJSON line).
    Payload(&'a str),
    /// Terminal sentinel (`data: [DONE]`).
    Done,
    /// Blank line, comment, or non-data SSE field.
    Ignorable,
}

/// A fully built outgoing request.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
    pub endpoint_kind: EndpointKind,
    pub model: String,
    pub dialect: Dialect,
}

/// Everything a dialect needs to encode a request body.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub backend: &'a BackendDescriptor,
    pub model: &'a str,
    pub input: &'a LlmInput,
    pub options: &'a RequestOptions,
    /// Already filtered: empty when tools must not be attached.
    pub tools: &'a [ToolSpec],
    pub endpoint_kind: EndpointKind,
}

/// One backend family: request encoding, line framing and payload decoding.
pub trait DialectAdapter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Encode the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] when the body cannot be encoded.
    fn build_body(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError>;

    /// Decode one line payload into a normalized event.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedEvent`] when the payload does not parse.
    fn decode_payload(&self, payload: &str) -> Result<Option<StreamEvent>, ClientError>;

    fn classify_line<'a>(&self, line: &'a str) -> LineKind<'a> {
        if self.dialect().is_sse() {
            classify_sse_line(line)
        } else {
            classify_ndjson_line(line)
        }
    }

    fn accept_header(&self) -> &'static str {
        if self.dialect().is_sse() {
            "text/event-stream"
        } else {
            "application/x-ndjson"
        }
    }

    /// Build the outgoing streaming request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingModelIdentifier`] when no model id can be
    /// resolved and [`ClientError::InvalidEndpoint`] when the URL, headers or
    /// body cannot be built.
    fn build_request(
        &self,
        backend: &BackendDescriptor,
        model_id: Option<&str>,
        input: &LlmInput,
        options: &RequestOptions,
        tools: &[ToolSpec],
    ) -> Result<PreparedRequest, ClientError> {
        let model = resolve_model(model_id, backend)?;
        let url = resolve_endpoint(backend, self.dialect())?;
        let endpoint_kind = EndpointKind::from_path(url.path());
        let tools = if options.include_tools && endpoint_kind == EndpointKind::Chat {
            tools
        } else {
            if !tools.is_empty() && options.include_tools {
                tracing::debug!(
                    path = url.path(),
                    "completion endpoint has no tool-calling convention; tools omitted"
                );
            }
            &[]
        };
        let ctx = RequestContext {
            backend,
            model: &model,
            input,
            options,
            tools,
            endpoint_kind,
        };
        let body = self.build_body(&ctx)?;
        let headers = build_headers(backend, self.accept_header())?;
        Ok(PreparedRequest {
            url,
            headers,
            body: bytes::Bytes::from(body),
            endpoint_kind,
            model,
            dialect: self.dialect(),
        })
    }
}

struct OpenAiChatAdapter;
struct OpenAiCompletionAdapter;
struct OllamaAdapter;
struct ResponsesAdapter;

impl DialectAdapter for OpenAiChatAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAiChat
    }

    fn build_body(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
        match ctx.endpoint_kind {
            EndpointKind::Chat => openai_chat::encoder::encode_chat_body(ctx),
            EndpointKind::Completion => openai_completion::encode_completion_body(ctx),
        }
    }

    fn decode_payload(&self, payload: &str) -> Result<Option<StreamEvent>, ClientError> {
        openai_chat::stream::decode_openai_payload(payload)
    }
}

impl DialectAdapter for OpenAiCompletionAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAiCompletion
    }

    fn build_body(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
        match ctx.endpoint_kind {
            EndpointKind::Chat => openai_chat::encoder::encode_chat_body(ctx),
            EndpointKind::Completion => openai_completion::encode_completion_body(ctx),
        }
    }

    fn decode_payload(&self, payload: &str) -> Result<Option<StreamEvent>, ClientError> {
        openai_chat::stream::decode_openai_payload(payload)
    }
}

impl DialectAdapter for OllamaAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Ollama
    }

    fn build_body(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
        ollama::encoder::encode_ollama_body(ctx)
    }

    fn decode_payload(&self, payload: &str) -> Result<Option<StreamEvent>, ClientError> {
        ollama::stream::decode_ollama_line(payload)
    }
}

impl DialectAdapter for ResponsesAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Responses
    }

    fn build_body(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>, ClientError> {
        openai_responses::encoder::encode_responses_body(ctx)
    }

    fn decode_payload(&self, payload: &str) -> Result<Option<StreamEvent>, ClientError> {
        openai_responses::stream::decode_responses_payload(payload)
    }
}

/// The adapter for a dialect.
#[must_use]
pub fn adapter_for(dialect: Dialect) -> &'static dyn DialectAdapter {
    match dialect {
        Dialect::OpenAiChat => &OpenAiChatAdapter,
        Dialect::OpenAiCompletion => &OpenAiCompletionAdapter,
        Dialect::Ollama => &OllamaAdapter,
        Dialect::Responses => &ResponsesAdapter,
    }
}

/// Classify an SSE line: only `data:` lines carry payload.
#[must_use]
pub fn classify_sse_line(line: &str) -> LineKind<'_> {
    match extract_sse_data_payload(line) {
        Some(payload) if is_done_sentinel(payload) => LineKind::Done,
        Some("") | None => LineKind::Ignorable,
        Some(payload) => LineKind::Payload(payload),
    }
}

/// Classify an NDJSON line: every non-blank line is a payload.
#[must_use]
pub fn classify_ndjson_line(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Ignorable
    } else {
        LineKind::Payload(trimmed)
    }
}

/// Explicit id, else the backend's first fallback id.
///
/// # Errors
///
/// Returns [`ClientError::MissingModelIdentifier`] when neither is usable.
pub fn resolve_model(
    model_id: Option<&str>,
    backend: &BackendDescriptor,
) -> Result<String, ClientError> {
    model_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| {
            backend
                .model_ids
                .iter()
                .map(|id| id.trim())
                .find(|id| !id.is_empty())
        })
        .map(str::to_owned)
        .ok_or(ClientError::MissingModelIdentifier)
}

/// Resolve the request URL, appending the dialect's default route when the
/// configured endpoint does not already name one.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] for unparsable or non-http URLs.
pub fn resolve_endpoint(
    backend: &BackendDescriptor,
    dialect: Dialect,
) -> Result<url::Url, ClientError> {
    let raw = backend.endpoint.trim();
    let mut url = url::Url::parse(raw)
        .map_err(|e| ClientError::InvalidEndpoint(format!("'{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidEndpoint(format!(
            "'{raw}': unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let path = url.path().trim_end_matches('/').to_owned();
    if !KNOWN_ROUTES.iter().any(|route| path.ends_with(route)) {
        url.set_path(&format!("{path}{}", dialect.default_route()));
    }
    Ok(url)
}

fn build_headers(
    backend: &BackendDescriptor,
    accept: &'static str,
) -> Result<http::HeaderMap, ClientError> {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    headers.insert(http::header::ACCEPT, http::HeaderValue::from_static(accept));

    let auth = match (backend.auth_header.as_deref(), backend.api_key.as_deref()) {
        (Some(header), _) if !header.trim().is_empty() => Some(header.trim().to_owned()),
        (_, Some(key)) if !key.trim().is_empty() => Some(format!("Bearer {}", key.trim())),
        _ => None,
    };
    if let Some(auth) = auth {
        let value = http::HeaderValue::from_str(&auth).map_err(|_| {
            ClientError::InvalidEndpoint("authorization header contains invalid characters".into())
        })?;
        headers.insert(http::header::AUTHORIZATION, value);
    }

    for (name, value) in &backend.extra_headers {
        let name = http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidEndpoint(format!("header name '{name}': {e}")))?;
        let value = http::HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidEndpoint(format!("header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub(crate) fn encode_json<T: serde::Serialize>(body: &T) -> Result<Vec<u8>, ClientError> {
    serde_json::to_vec(body)
        .map_err(|e| ClientError::InvalidEndpoint(format!("failed to encode request body: {e}")))
}
