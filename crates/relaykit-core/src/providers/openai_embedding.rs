//! Embeddings through an OpenAI-compatible `/embeddings` endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result, TransientError};
use crate::normalize;
use crate::registry::{ProviderConfig, ProviderRegistry};
use crate::retry::{RequestDescriptor, RetryExecutor, RetryPolicy, VendorCall};

use super::http::{build_client, decode, post_json};
use super::types::{EmbeddingResult, EmbeddingVector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    #[default]
    Float,
    Base64,
}

impl std::str::FromStr for EncodingFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float" => Ok(Self::Float),
            "base64" => Ok(Self::Base64),
            other => Err(Error::input(format!(
                "unknown encoding format '{}', expected 'float' or 'base64'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingRequest {
    pub provider: String,
    pub model: String,
    pub input_text: String,
    pub dimensions: Option<u32>,
    pub encoding_format: EncodingFormat,
}

impl OpenAiEmbeddingRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_text: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_text: input_text.into(),
            dimensions: None,
            encoding_format: EncodingFormat::Float,
        }
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_encoding_format(mut self, format: EncodingFormat) -> Self {
        self.encoding_format = format;
        self
    }

    pub fn to_body(&self) -> Result<EmbeddingBody> {
        if self.input_text.is_empty() {
            return Err(Error::input("input_text must not be empty"));
        }
        Ok(EmbeddingBody {
            model: self.model.clone(),
            input: self.input_text.clone(),
            encoding_format: self.encoding_format,
            dimensions: self.dimensions.filter(|&d| d > 0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingBody {
    pub model: String,
    pub input: String,
    pub encoding_format: EncodingFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

// ── wire response ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    #[serde(default)]
    pub index: u32,
    pub embedding: EmbeddingVector,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

pub struct HttpEmbeddingBackend {
    client: Client,
}

impl Default for HttpEmbeddingBackend {
    fn default() -> Self {
        Self {
            client: build_client(),
        }
    }
}

#[async_trait]
impl VendorCall<EmbeddingBody, EmbeddingResponse> for HttpEmbeddingBackend {
    async fn call(&self, provider: &ProviderConfig, body: &EmbeddingBody) -> Result<EmbeddingResponse> {
        let url = provider.endpoint("embeddings");
        let value = post_json(&self.client, &url, &provider.api_key, body).await?;
        let response: EmbeddingResponse = decode(value, "embedding")?;
        if response.data.is_empty() {
            return Err(TransientError::unexpected("embedding response had no data").into());
        }
        Ok(response)
    }
}

pub type EmbeddingBackend = dyn VendorCall<EmbeddingBody, EmbeddingResponse>;

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    executor: RetryExecutor,
    backend: Arc<EmbeddingBackend>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("policy", &self.policy)
            .finish()
    }
}

impl OpenAiEmbeddingClient {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            executor: RetryExecutor::new(registry),
            backend: Arc::new(HttpEmbeddingBackend::default()),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backend(mut self, backend: Arc<EmbeddingBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub async fn embed(
        &self,
        request: &OpenAiEmbeddingRequest,
    ) -> Result<EmbeddingResult<EmbeddingVector>> {
        let body = request.to_body()?;
        let descriptor = RequestDescriptor::new(&request.provider, &request.model, body)
            .with_policy(self.policy);
        let attempted = self.executor.execute(descriptor, self.backend.as_ref()).await?;
        let result = normalize::openai_embedding(attempted);
        info!(
            "Embedding processing completed with {} tokens",
            result.prompt_tokens.unwrap_or(0)
        );
        Ok(result)
    }
}
