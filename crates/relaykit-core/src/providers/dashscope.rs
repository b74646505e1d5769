//! DashScope (Alibaba Cloud Model Studio) native embedding API
//!
//! Text models (`text-embedding-v1..v4`) and multimodal models
//! (`multimodal-embedding-v1`) use different endpoints and body shapes but
//! share one response envelope.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result, TransientError};
use crate::normalize;
use crate::registry::{ProviderConfig, ProviderRegistry};
use crate::retry::{RequestDescriptor, RetryExecutor, RetryPolicy, VendorCall};

use super::http::{build_client, decode, post_json};
use super::types::{DashScopeEmbedding, EmbeddingResult, MultimodalEmbeddingResult, SparseEntry};

const TEXT_EMBEDDING_PATH: &str = "services/embeddings/text-embedding/text-embedding";
const MULTIMODAL_EMBEDDING_PATH: &str =
    "services/embeddings/multimodal-embedding/multimodal-embedding";

#[derive(Debug, Clone)]
pub struct TextEmbeddingRequest {
    pub provider: String,
    pub model: String,
    pub input_text: String,
    pub dimensions: Option<u32>,
    /// "dense", "sparse" or "dense&sparse"
    pub output_type: Option<String>,
}

impl TextEmbeddingRequest {
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
            output_type: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_output_type(mut self, output_type: impl Into<String>) -> Self {
        self.output_type = Some(output_type.into());
        self
    }

    pub fn to_body(&self) -> Result<TextEmbeddingBody> {
        if self.input_text.is_empty() {
            return Err(Error::input("input_text must not be empty"));
        }
        let dimension = self.dimensions.filter(|&d| d > 0);
        let output_type = self.output_type.clone().filter(|t| !t.is_empty());
        let parameters = if dimension.is_some() || output_type.is_some() {
            Some(TextParameters {
                dimension,
                output_type,
            })
        } else {
            None
        };
        Ok(TextEmbeddingBody {
            model: self.model.clone(),
            input: TextInput {
                texts: vec![self.input_text.clone()],
            },
            parameters,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultimodalEmbeddingRequest {
    pub provider: String,
    pub model: String,
    pub input_text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

impl MultimodalEmbeddingRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.input_text = Some(text.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_video_url(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    /// Contents in text, image, video order; at least one is required
    pub fn to_body(&self) -> Result<MultimodalEmbeddingBody> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let mut contents = Vec::new();
        if let Some(text) = non_empty(&self.input_text) {
            contents.push(MultimodalContent::Text(text));
        }
        if let Some(image) = non_empty(&self.image_url) {
            contents.push(MultimodalContent::Image(image));
        }
        if let Some(video) = non_empty(&self.video_url) {
            contents.push(MultimodalContent::Video(video));
        }
        if contents.is_empty() {
            return Err(Error::input(
                "at least one of input_text, image_url or video_url must be provided",
            ));
        }
        Ok(MultimodalEmbeddingBody {
            model: self.model.clone(),
            input: MultimodalInput { contents },
        })
    }
}

/// Either kind of DashScope embedding request
#[derive(Debug, Clone)]
pub enum DashScopeRequest {
    Text(TextEmbeddingRequest),
    Multimodal(MultimodalEmbeddingRequest),
}

impl DashScopeRequest {
    /// Pick the request kind from the model name: models whose name contains
    /// "multimodal" take text/image/video, everything else takes text only.
    pub fn for_model(
        provider: &str,
        model: &str,
        input_text: Option<String>,
        image_url: Option<String>,
        video_url: Option<String>,
    ) -> Self {
        if is_multimodal_model(model) {
            Self::Multimodal(MultimodalEmbeddingRequest {
                provider: provider.to_string(),
                model: model.to_string(),
                input_text,
                image_url,
                video_url,
            })
        } else {
            Self::Text(TextEmbeddingRequest::new(
                provider,
                model,
                input_text.unwrap_or_default(),
            ))
        }
    }
}

pub fn is_multimodal_model(model: &str) -> bool {
    model.contains("multimodal")
}

/// Result of [`DashScopeEmbeddingClient::embed`]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DashScopeResult {
    Text(EmbeddingResult<DashScopeEmbedding>),
    Multimodal(MultimodalEmbeddingResult),
}

impl DashScopeResult {
    pub fn embeddings(&self) -> &[DashScopeEmbedding] {
        match self {
            Self::Text(r) => &r.result,
            Self::Multimodal(r) => &r.result,
        }
    }

    pub fn total_tokens(&self) -> Option<u32> {
        match self {
            Self::Text(r) => r.total_tokens,
            Self::Multimodal(r) => r.total_tokens,
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        match self {
            Self::Text(r) => r.elapsed,
            Self::Multimodal(r) => r.elapsed,
        }
    }
}

// ── wire bodies ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextEmbeddingBody {
    pub model: String,
    pub input: TextInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TextParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultimodalEmbeddingBody {
    pub model: String,
    pub input: MultimodalInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultimodalInput {
    pub contents: Vec<MultimodalContent>,
}

/// Serializes as `{"text": ...}`, `{"image": ...}` or `{"video": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MultimodalContent {
    Text(String),
    Image(String),
    Video(String),
}

// ── wire response ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashScopeResponse {
    #[serde(default)]
    pub output: Option<DashScopeOutput>,
    #[serde(default)]
    pub usage: Option<DashScopeUsage>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashScopeOutput {
    #[serde(default)]
    pub embeddings: Vec<WireEmbedding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireEmbedding {
    #[serde(default, alias = "text_index")]
    pub index: u32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub sparse_embedding: Option<Vec<SparseEntry>>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Every field is optional; which ones appear depends on the model
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DashScopeUsage {
    #[serde(default)]
    pub total_tokens: Option<u32>,
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub image_count: Option<u32>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Decode the envelope; a `code` in the body or a missing output is retryable
pub fn decode_dashscope_response(value: serde_json::Value) -> Result<DashScopeResponse> {
    let response: DashScopeResponse = decode(value, "DashScope embedding")?;
    if let Some(code) = response.code.as_deref().filter(|c| !c.is_empty()) {
        return Err(TransientError::Vendor {
            code: code.to_string(),
            message: response.message.clone().unwrap_or_default(),
        }
        .into());
    }
    let has_embeddings = response
        .output
        .as_ref()
        .is_some_and(|o| !o.embeddings.is_empty());
    if !has_embeddings {
        return Err(TransientError::unexpected("DashScope response had no embeddings").into());
    }
    Ok(response)
}

/// Native API root for a provider.
///
/// A provider configured for OpenAI-compatible mode
/// (`https://host/compatible-mode/v1`) is mapped to `https://host/api/v1`.
pub fn native_base_url(provider: &ProviderConfig) -> Result<String> {
    let url = Url::parse(&provider.base_url).map_err(|e| {
        Error::configuration(format!(
            "provider '{}' has an invalid base_url: {}",
            provider.name, e
        ))
    })?;
    if url.path().contains("compatible-mode") {
        Ok(format!("{}/api/v1", url.origin().ascii_serialization()))
    } else {
        Ok(provider.base_url.trim_end_matches('/').to_string())
    }
}

pub struct HttpDashScopeBackend {
    client: Client,
}

impl Default for HttpDashScopeBackend {
    fn default() -> Self {
        Self {
            client: build_client(),
        }
    }
}

impl HttpDashScopeBackend {
    async fn post<B: Serialize + Sync>(
        &self,
        provider: &ProviderConfig,
        path: &str,
        body: &B,
    ) -> Result<DashScopeResponse> {
        let url = format!("{}/{}", native_base_url(provider)?, path);
        debug!("DashScope request to {}", url);
        let value = post_json(&self.client, &url, &provider.api_key, body).await?;
        decode_dashscope_response(value)
    }
}

#[async_trait]
impl VendorCall<TextEmbeddingBody, DashScopeResponse> for HttpDashScopeBackend {
    async fn call(&self, provider: &ProviderConfig, body: &TextEmbeddingBody) -> Result<DashScopeResponse> {
        self.post(provider, TEXT_EMBEDDING_PATH, body).await
    }
}

#[async_trait]
impl VendorCall<MultimodalEmbeddingBody, DashScopeResponse> for HttpDashScopeBackend {
    async fn call(
        &self,
        provider: &ProviderConfig,
        body: &MultimodalEmbeddingBody,
    ) -> Result<DashScopeResponse> {
        self.post(provider, MULTIMODAL_EMBEDDING_PATH, body).await
    }
}

pub type TextEmbeddingBackend = dyn VendorCall<TextEmbeddingBody, DashScopeResponse>;
pub type MultimodalEmbeddingBackend = dyn VendorCall<MultimodalEmbeddingBody, DashScopeResponse>;

#[derive(Clone)]
pub struct DashScopeEmbeddingClient {
    executor: RetryExecutor,
    text_backend: Arc<TextEmbeddingBackend>,
    multimodal_backend: Arc<MultimodalEmbeddingBackend>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DashScopeEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashScopeEmbeddingClient")
            .field("policy", &self.policy)
            .finish()
    }
}

impl DashScopeEmbeddingClient {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let http = Arc::new(HttpDashScopeBackend::default());
        Self {
            executor: RetryExecutor::new(registry),
            text_backend: http.clone(),
            multimodal_backend: http,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_text_backend(mut self, backend: Arc<TextEmbeddingBackend>) -> Self {
        self.text_backend = backend;
        self
    }

    pub fn with_multimodal_backend(mut self, backend: Arc<MultimodalEmbeddingBackend>) -> Self {
        self.multimodal_backend = backend;
        self
    }

    pub async fn embed(&self, request: &DashScopeRequest) -> Result<DashScopeResult> {
        match request {
            DashScopeRequest::Text(r) => self.embed_text(r).await.map(DashScopeResult::Text),
            DashScopeRequest::Multimodal(r) => {
                self.embed_multimodal(r).await.map(DashScopeResult::Multimodal)
            }
        }
    }

    pub async fn embed_text(
        &self,
        request: &TextEmbeddingRequest,
    ) -> Result<EmbeddingResult<DashScopeEmbedding>> {
        let body = request.to_body()?;
        let descriptor = RequestDescriptor::new(&request.provider, &request.model, body)
            .with_policy(self.policy);
        let attempted = self
            .executor
            .execute(descriptor, self.text_backend.as_ref())
            .await?;
        info!("Embedding processing completed");
        Ok(normalize::dashscope_text(attempted))
    }

    pub async fn embed_multimodal(
        &self,
        request: &MultimodalEmbeddingRequest,
    ) -> Result<MultimodalEmbeddingResult> {
        let body = request.to_body()?;
        let descriptor = RequestDescriptor::new(&request.provider, &request.model, body)
            .with_policy(self.policy);
        let attempted = self
            .executor
            .execute(descriptor, self.multimodal_backend.as_ref())
            .await?;
        info!("Multimodal embedding processing completed");
        Ok(normalize::dashscope_multimodal(attempted))
    }
}
