//! Vendor clients
//!
//! Every client follows the same shape: build a wire payload from the
//! caller's request, hand it to the [`RetryExecutor`](crate::retry::RetryExecutor)
//! together with a [`VendorCall`](crate::retry::VendorCall) backend, then
//! normalize the raw response.

pub mod dashscope;
pub mod http;
pub mod openai;
pub mod openai_embedding;
pub mod types;

pub use dashscope::{
    DashScopeEmbeddingClient, DashScopeRequest, DashScopeResult, MultimodalEmbeddingRequest,
    TextEmbeddingRequest,
};
pub use openai::{ChatClient, ChatMessage, ChatRequest, HttpChatBackend, function_tool};
pub use openai_embedding::{EncodingFormat, OpenAiEmbeddingClient, OpenAiEmbeddingRequest};
pub use types::{
    ChatCompletion, DashScopeEmbedding, EmbeddingResult, EmbeddingVector,
    MultimodalEmbeddingResult, SparseEntry, ToolCall,
};
