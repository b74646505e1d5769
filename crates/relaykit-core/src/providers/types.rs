//! Normalized call results returned to callers

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

fn as_secs_f64<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Structured function call requested by a chat model.
/// The caller executes it and feeds the result back as a new call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// Raw JSON text as produced by the model
    pub function_arguments: String,
}

impl ToolCall {
    /// Parsed arguments; malformed JSON yields an empty object
    pub fn arguments(&self) -> Value {
        serde_json::from_str(&self.function_arguments)
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }
}

/// Result of a chat completion call
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    /// First choice's content, trimmed; empty when the model only called tools
    pub result: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(rename = "elapsed_time", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatCompletion {
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// One embedding vector as returned by an OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Float(Vec<f32>),
    /// `encoding_format = "base64"`: little-endian f32s, base64 encoded
    Base64(String),
}

impl EmbeddingVector {
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Self::Float(v) => Some(v),
            Self::Base64(_) => None,
        }
    }
}

/// Result of a text embedding call
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResult<T> {
    pub result: Vec<T>,
    pub prompt_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    #[serde(rename = "elapsed_time", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Non-zero entry of a DashScope sparse embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseEntry {
    pub index: u32,
    pub value: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// One DashScope embedding (text or multimodal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashScopeEmbedding {
    pub index: u32,
    /// Absent when only a sparse embedding was requested
    pub embedding: Option<Vec<f32>>,
    pub sparse_embedding: Option<Vec<SparseEntry>>,
    /// Multimodal only: "text", "image" or "video"
    pub kind: Option<String>,
}

/// Result of a multimodal embedding call
#[derive(Debug, Clone, Serialize)]
pub struct MultimodalEmbeddingResult {
    pub result: Vec<DashScopeEmbedding>,
    pub prompt_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub image_count: u32,
    /// Seconds of video billed
    pub video_duration: f64,
    #[serde(rename = "elapsed_time", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_arguments() {
        let call = ToolCall {
            id: "call_1".to_string(),
            function_name: "search".to_string(),
            function_arguments: r#"{"query":"rust"}"#.to_string(),
        };
        assert_eq!(call.arguments()["query"], "rust");

        let broken = ToolCall {
            function_arguments: "{not json".to_string(),
            ..call
        };
        assert_eq!(broken.arguments(), serde_json::json!({}));
    }

    #[test]
    fn test_chat_completion_serializes_elapsed_seconds() {
        let completion = ChatCompletion {
            result: "hi".to_string(),
            input_tokens: 3,
            output_tokens: 1,
            elapsed: Duration::from_millis(1500),
            attempts: 1,
            tool_calls: None,
        };
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["elapsed_time"], 1.5);
        assert_eq!(json["input_tokens"], 3);
        assert!(json.get("tool_calls").is_none());
        assert!(!completion.has_tool_calls());
    }

    #[test]
    fn test_embedding_vector_untagged() {
        let floats: EmbeddingVector = serde_json::from_str("[0.5, -1.0]").unwrap();
        assert_eq!(floats.as_floats(), Some(&[0.5f32, -1.0][..]));
        let b64: EmbeddingVector = serde_json::from_str("\"AAAA\"").unwrap();
        assert_eq!(b64, EmbeddingVector::Base64("AAAA".to_string()));
        assert!(b64.as_floats().is_none());
    }
}
