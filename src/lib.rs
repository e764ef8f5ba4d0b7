pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

mod util;

pub use client::{LlmStream, StreamPhase, StreamingClient};
pub use config::{BackendDescriptor, ClientConfig, RequestOptions};
pub use error::ClientError;
pub use protocol::canonical::{ChatMessage, Dialect, LlmInput, Role, ToolSpec};
pub use stream::{parse_tool_call_token, TOOL_CALL_PREFIX};
