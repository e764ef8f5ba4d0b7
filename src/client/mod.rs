//! Streaming orchestrator.
//!
//! [`StreamingClient::stream`] builds the request for the configured backend,
//! spawns one task per invocation and returns an [`LlmStream`] of strings:
//! plain text fragments interleaved with `TOOL_CALL: {...}` tokens.

mod driver;
mod sink;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendDescriptor, ClientConfig, RequestOptions, TransportConfig};
use crate::error::ClientError;
use crate::observability::{log_stream_complete, StreamSummary};
use crate::protocol::adapter::{adapter_for, PreparedRequest};
use crate::protocol::canonical::{LlmInput, ToolSpec};
use crate::stream::{line_stream, parse_tool_call_token};
use crate::transport::HttpTransport;

use self::driver::{Emission, LineOutcome, StreamDriver};
use self::sink::{SpillBuffer, StreamItem, StreamSink, StreamSpill};

/// Lifecycle of one stream invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    RequestBuilt,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamPhase::Idle => "idle",
            StreamPhase::RequestBuilt => "request_built",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Completed => "completed",
            StreamPhase::Failed => "failed",
            StreamPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Request settings snapshotted by each stream at start.
#[derive(Debug, Clone)]
struct RequestSettings {
    backend: BackendDescriptor,
    model: Option<String>,
    options: RequestOptions,
    tools: Vec<ToolSpec>,
}

/// Streaming client for one configured backend.
///
/// Settings changes apply to the next [`stream`](Self::stream) call; streams
/// already running keep the settings they started with.
pub struct StreamingClient {
    settings: RwLock<RequestSettings>,
    transport: Arc<HttpTransport>,
    channel_capacity: usize,
    cancel_root: Mutex<CancellationToken>,
    spill: Arc<SpillBuffer>,
}

impl StreamingClient {
    /// Build a client from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self {
            settings: RwLock::new(RequestSettings {
                backend: config.backend.clone(),
                model: config.model.clone(),
                options: config.options.clone(),
                tools: config.tools.clone(),
            }),
            transport: Arc::new(transport),
            channel_capacity: config.transport.channel_capacity.max(1),
            cancel_root: Mutex::new(CancellationToken::new()),
            spill: Arc::new(SpillBuffer::default()),
        })
    }

    /// Build a client for `backend` with default options and transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the HTTP client cannot be built.
    pub fn for_backend(backend: BackendDescriptor) -> Result<Self, ClientError> {
        Self::new(&ClientConfig::new(backend))
    }

    /// Build a client with explicit transport settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the HTTP client cannot be built.
    pub fn with_transport(
        backend: BackendDescriptor,
        transport: TransportConfig,
    ) -> Result<Self, ClientError> {
        let mut config = ClientConfig::new(backend);
        config.transport = transport;
        Self::new(&config)
    }

    #[must_use]
    pub fn backend(&self) -> BackendDescriptor {
        self.settings.read().backend.clone()
    }

    pub fn set_backend(&self, backend: BackendDescriptor) {
        self.settings.write().backend = backend;
    }

    pub fn set_model(&self, model: Option<String>) {
        self.settings.write().model = model;
    }

    pub fn set_options(&self, options: RequestOptions) {
        self.settings.write().options = options;
    }

    pub fn set_tools(&self, tools: Vec<ToolSpec>) {
        self.settings.write().tools = tools;
    }

    /// Build the request the next [`stream`](Self::stream) call would send.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingModelIdentifier`] or
    /// [`ClientError::InvalidEndpoint`] when the request cannot be built.
    pub fn prepare_request(&self, input: &LlmInput) -> Result<PreparedRequest, ClientError> {
        let settings = self.settings.read().clone();
        adapter_for(settings.backend.dialect).build_request(
            &settings.backend,
            settings.model.as_deref(),
            input,
            &settings.options,
            &settings.tools,
        )
    }

    /// Start streaming a completion for `input`.
    ///
    /// Request-building failures, and a call made outside a Tokio runtime,
    /// are yielded as the first and only item.
    pub fn stream(&self, input: impl Into<LlmInput>) -> LlmStream {
        let input = input.into();
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let token = self.cancel_root.lock().child_token();
        let spill = StreamSpill::new(Arc::clone(&self.spill));
        let stream = LlmStream {
            rx,
            token: token.clone(),
            spill: Arc::clone(&spill),
        };

        let request = match self.prepare_request(&input) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(phase = %StreamPhase::Failed, error = %err, "request build failed");
                // The channel is fresh and has capacity for at least one item.
                let _ = tx.try_send(Err(err));
                return stream;
            }
        };
        tracing::debug!(
            phase = %StreamPhase::RequestBuilt,
            dialect = %request.dialect,
            url = %request.url,
            model = %request.model,
            "stream request built"
        );

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::debug!(phase = %StreamPhase::Failed, error = %err, "no runtime for stream task");
                let _ = tx.try_send(Err(ClientError::Config(format!(
                    "stream must be started inside a Tokio runtime: {err}"
                ))));
                return stream;
            }
        };
        let sink = StreamSink::new(tx, spill);
        runtime.spawn(run_stream(self.transport.clone(), request, token, sink));
        stream
    }

    /// Interrupt every stream started from this client. Idempotent; streams
    /// started afterwards are unaffected.
    pub fn cancel_active_stream(&self) {
        let mut root = self.cancel_root.lock();
        root.cancel();
        *root = CancellationToken::new();
    }

    /// Take every tool-call token that could not be delivered live.
    #[must_use]
    pub fn drain_buffered_tool_tokens(&self) -> Vec<String> {
        self.spill.drain()
    }

    #[must_use]
    pub fn buffered_tool_token_count(&self) -> usize {
        self.spill.len()
    }
}

/// Lazy output sequence of one stream invocation.
///
/// Ends on completion, on the first error, or on cancellation (which is not
/// an error). Dropping it cancels the underlying request.
pub struct LlmStream {
    rx: mpsc::Receiver<StreamItem>,
    token: CancellationToken,
    spill: Arc<StreamSpill>,
}

impl LlmStream {
    /// Cancel this stream only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close the channel and move tool-call tokens that were queued but never
    /// consumed into the spill buffer.
    fn salvage_queued_tool_tokens(&mut self) {
        self.rx.close();
        let mut queued = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Ok(token) = item {
                if parse_tool_call_token(&token).is_some() {
                    queued.push(token);
                }
            }
        }
        self.spill.salvage(queued);
    }
}

impl Stream for LlmStream {
    type Item = Result<String, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            self.salvage_queued_tool_tokens();
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for LlmStream {
    fn drop(&mut self) {
        self.token.cancel();
        self.salvage_queued_tool_tokens();
    }
}

enum Step {
    Line(Option<Result<String, reqwest::Error>>),
    Cancelled,
}

async fn run_stream(
    transport: Arc<HttpTransport>,
    request: PreparedRequest,
    token: CancellationToken,
    mut sink: StreamSink,
) {
    let started = Instant::now();
    let mut driver = StreamDriver::new(request.dialect);

    let opened = tokio::select! {
        biased;
        () = token.cancelled() => None,
        result = transport.open_stream(&request) => Some(result),
    };
    let response = match opened {
        None => {
            tracing::debug!(phase = %StreamPhase::Cancelled, "cancelled before response");
            return;
        }
        Some(Err(err)) => {
            tracing::debug!(phase = %StreamPhase::Failed, error = %err, "stream failed to open");
            deliver_failure(&sink, &token, err).await;
            return;
        }
        Some(Ok(response)) => response,
    };
    tracing::debug!(phase = %StreamPhase::Streaming, status = response.status().as_u16(), "stream opened");

    let mut lines = Box::pin(line_stream(response.bytes_stream()));
    let mut emissions: Vec<Emission> = Vec::with_capacity(4);
    loop {
        let step = tokio::select! {
            biased;
            () = token.cancelled() => Step::Cancelled,
            () = sink.closed() => Step::Cancelled,
            line = lines.next() => Step::Line(line),
        };
        let line = match step {
            Step::Cancelled => {
                tracing::debug!(phase = %StreamPhase::Cancelled, "stream cancelled");
                return;
            }
            Step::Line(None) => break,
            Step::Line(Some(Err(err))) => {
                tracing::debug!(phase = %StreamPhase::Failed, error = %err, "body read failed");
                let err = ClientError::InvalidResponse(format!("failed to read response body: {err}"));
                deliver_failure(&sink, &token, err).await;
                return;
            }
            Step::Line(Some(Ok(line))) => line,
        };

        let outcome = driver.handle_line(&line, &mut emissions);
        sink.emit_all(emissions.drain(..));
        match outcome {
            LineOutcome::Continue => {}
            LineOutcome::Finished => break,
            LineOutcome::Failed(err) => {
                tracing::debug!(phase = %StreamPhase::Failed, error = %err, "backend reported failure");
                deliver_failure(&sink, &token, err).await;
                return;
            }
        }
    }

    driver.finish(&mut emissions);
    sink.emit_all(emissions.drain(..));
    tracing::debug!(
        phase = %StreamPhase::Completed,
        skipped_lines = driver.skipped_lines(),
        dropped_text = sink.dropped_text(),
        "stream finished"
    );
    log_stream_complete(
        &StreamSummary {
            dialect: request.dialect,
            model: request.model.clone(),
            usage: driver.usage(),
            tool_calls: driver.tool_call_count(),
            buffered_tool_tokens: sink.spilled(),
        },
        started.elapsed(),
    );
}

async fn deliver_failure(sink: &StreamSink, token: &CancellationToken, err: ClientError) {
    tokio::select! {
        biased;
        () = token.cancelled() => {}
        () = sink.fail(err) => {}
    }
}
