//! relaykit-core - Retrying wrapper around LLM vendor APIs
//!
//! This crate provides:
//! - Provider registry loaded from a TOML provider file
//! - Retry executor with exponential backoff and jitter
//! - Chat completion client for OpenAI-compatible endpoints, with tool calls
//! - Embedding clients for OpenAI-compatible and DashScope endpoints
//! - Response normalizer producing uniform result records
//! - Tool-call conversation loop driven by a caller-supplied executor

pub mod conversation;
pub mod error;
pub mod normalize;
pub mod providers;
pub mod registry;
pub mod retry;

// Re-export main types for convenience
pub use conversation::{ConversationOutcome, ToolConversation, ToolExecutor};
pub use error::{Error, Result, TransientError};
pub use providers::{
    ChatClient, ChatCompletion, ChatMessage, ChatRequest, DashScopeEmbedding,
    DashScopeEmbeddingClient, DashScopeRequest, DashScopeResult, EmbeddingResult, EmbeddingVector,
    EncodingFormat, MultimodalEmbeddingRequest, MultimodalEmbeddingResult, OpenAiEmbeddingClient,
    OpenAiEmbeddingRequest, SparseEntry, TextEmbeddingRequest, ToolCall, function_tool,
};
pub use registry::{ProviderConfig, ProviderRegistry, default_provider_path, mask_secret};
pub use retry::{Attempted, RequestDescriptor, RetryExecutor, RetryPolicy, VendorCall};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<ProviderRegistry>();
        let _ = std::mem::size_of::<RetryExecutor>();
        let _ = std::mem::size_of::<ChatClient>();
        let _ = std::mem::size_of::<ChatCompletion>();
        let _ = std::mem::size_of::<DashScopeEmbeddingClient>();
        let _ = std::mem::size_of::<OpenAiEmbeddingClient>();
    }
}
