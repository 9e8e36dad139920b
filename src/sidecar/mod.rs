//! Client for the locally-running model sidecar (OpenAI-compatible subset).
//!
//! The engine treats the sidecar as an opaque, fallible RPC: list the hosted
//! models, send one chat completion at a time. The [`LocalModelClient`] trait
//! is the seam; tests and alternative backends implement it directly.

pub mod error;
pub mod http;
pub mod types;

use async_trait::async_trait;

pub use error::ClientError;
pub use http::{HttpSidecarClient, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use types::{ChatRequest, ChatResponse, Message, Role};

/// Blocking-style request/response access to locally hosted models.
#[async_trait]
pub trait LocalModelClient: Send + Sync {
    /// Ids of the models the sidecar currently hosts.
    async fn list_models(&self) -> Result<Vec<String>, ClientError>;

    /// One chat completion, single turn, timeout-bounded.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ClientError>;
}
