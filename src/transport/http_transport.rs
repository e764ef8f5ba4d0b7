use std::time::Duration;

use crate::config::TransportConfig;
use crate::error::ClientError;
use crate::protocol::adapter::PreparedRequest;
use crate::util::truncated_utf8_prefix;

const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn build_reqwest_client(config: &TransportConfig) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ClientError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ClientError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client used to open streaming responses.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    error_body_limit: usize,
}

impl HttpTransport {
    /// Build the transport from its config section.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
            error_body_limit: config.error_body_limit.max(1),
        })
    }

    #[must_use]
    pub fn error_body_limit(&self) -> usize {
        self.error_body_limit
    }

    /// POST the request and return the response once a 2xx status is seen.
    /// The body is left unread for the caller to stream.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidResponse`] when the request cannot be
    /// sent or no HTTP response arrives, and [`ClientError::Http`] for non-2xx
    /// statuses, carrying at most `error_body_limit` bytes of the body.
    pub async fn open_stream(
        &self,
        request: &PreparedRequest,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self
            .client
            .post(request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|err| {
                ClientError::InvalidResponse(format!("request to {} failed: {err}", request.url))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = read_bounded_body(response, self.error_body_limit).await;
        tracing::warn!(
            status = status.as_u16(),
            url = %request.url,
            body_len = body.len(),
            "upstream returned error status"
        );
        Err(ClientError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Read at most `limit` bytes of a response body, chunk by chunk, and drop
/// the rest unread. Read failures keep whatever arrived before them.
async fn read_bounded_body(mut response: reqwest::Response, limit: usize) -> String {
    let mut collected: Vec<u8> = Vec::with_capacity(limit.min(4096));
    while collected.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit - collected.len();
                collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "error body read interrupted");
                break;
            }
        }
    }
    truncated_utf8_prefix(&collected, limit)
}
