//! Response normalizer: vendor responses to uniform results
//!
//! Usage counters are read from whichever field the vendor fills in; a
//! missing field yields zero (chat) or `None` (embeddings), never an error.

use crate::providers::dashscope::{DashScopeResponse, WireEmbedding};
use crate::providers::openai::ChatCompletionResponse;
use crate::providers::openai_embedding::EmbeddingResponse;
use crate::providers::types::{
    ChatCompletion, DashScopeEmbedding, EmbeddingResult, EmbeddingVector,
    MultimodalEmbeddingResult, ToolCall,
};
use crate::retry::Attempted;

pub fn chat_completion(attempted: Attempted<ChatCompletionResponse>) -> ChatCompletion {
    let Attempted {
        value,
        attempts,
        elapsed,
    } = attempted;

    let usage = value.usage.unwrap_or_default();
    let message = value.choices.into_iter().next().map(|c| c.message);

    let (result, tool_calls) = match message {
        Some(message) => {
            let text = message
                .content
                .map(|c| c.trim().to_string())
                .unwrap_or_default();
            let calls = message
                .tool_calls
                .filter(|c| !c.is_empty())
                .map(|c| c.into_iter().map(ToolCall::from).collect());
            (text, calls)
        }
        None => (String::new(), None),
    };

    ChatCompletion {
        result,
        input_tokens: usage.prompt_tokens.unwrap_or(0),
        output_tokens: usage.completion_tokens.unwrap_or(0),
        elapsed,
        attempts,
        tool_calls,
    }
}

pub fn openai_embedding(
    attempted: Attempted<EmbeddingResponse>,
) -> EmbeddingResult<EmbeddingVector> {
    let Attempted {
        value,
        attempts,
        elapsed,
    } = attempted;

    let usage = value.usage.unwrap_or_default();
    let mut data = value.data;
    data.sort_by_key(|d| d.index);

    EmbeddingResult {
        result: data.into_iter().map(|d| d.embedding).collect(),
        prompt_tokens: usage.prompt_tokens,
        total_tokens: usage.total_tokens,
        elapsed,
        attempts,
        request_id: None,
    }
}

fn dashscope_embeddings(response: &mut DashScopeResponse) -> Vec<DashScopeEmbedding> {
    let mut embeddings: Vec<WireEmbedding> = response
        .output
        .take()
        .map(|o| o.embeddings)
        .unwrap_or_default();
    embeddings.sort_by_key(|e| e.index);
    embeddings
        .into_iter()
        .map(|e| DashScopeEmbedding {
            index: e.index,
            embedding: e.embedding,
            sparse_embedding: e.sparse_embedding,
            kind: e.kind,
        })
        .collect()
}

/// Text models report `total_tokens`; `prompt_tokens` comes from
/// `input_tokens` when present
pub fn dashscope_text(
    attempted: Attempted<DashScopeResponse>,
) -> EmbeddingResult<DashScopeEmbedding> {
    let Attempted {
        mut value,
        attempts,
        elapsed,
    } = attempted;

    let usage = value.usage.unwrap_or_default();
    EmbeddingResult {
        result: dashscope_embeddings(&mut value),
        prompt_tokens: usage.input_tokens,
        total_tokens: usage.total_tokens,
        elapsed,
        attempts,
        request_id: value.request_id,
    }
}

/// Multimodal models report `input_tokens`, `image_count` and `duration`
pub fn dashscope_multimodal(attempted: Attempted<DashScopeResponse>) -> MultimodalEmbeddingResult {
    let Attempted {
        mut value,
        attempts,
        elapsed,
    } = attempted;

    let usage = value.usage.unwrap_or_default();
    MultimodalEmbeddingResult {
        result: dashscope_embeddings(&mut value),
        prompt_tokens: usage.input_tokens,
        total_tokens: usage.input_tokens,
        image_count: usage.image_count.unwrap_or(0),
        video_duration: usage.duration.unwrap_or(0.0),
        elapsed,
        attempts,
        request_id: value.request_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::dashscope::{DashScopeOutput, DashScopeUsage};
    use crate::providers::openai::{ChatChoice, ChatChoiceMessage, WireFunction, WireToolCall};
    use crate::providers::openai_embedding::{EmbeddingData, EmbeddingUsage};
    use std::time::Duration;

    fn attempted<T>(value: T) -> Attempted<T> {
        Attempted {
            value,
            attempts: 2,
            elapsed: Duration::from_secs(31),
        }
    }

    #[test]
    fn test_chat_text_is_trimmed() {
        let out = chat_completion(attempted(ChatCompletionResponse::text("  hi\n", 3, 1)));
        assert_eq!(out.result, "hi");
        assert_eq!(out.input_tokens, 3);
        assert_eq!(out.output_tokens, 1);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.elapsed, Duration::from_secs(31));
        assert!(out.tool_calls.is_none());
    }

    #[test]
    fn test_chat_missing_usage_is_zero() {
        let mut response = ChatCompletionResponse::text("ok", 0, 0);
        response.usage = None;
        let out = chat_completion(attempted(response));
        assert_eq!(out.input_tokens, 0);
        assert_eq!(out.output_tokens, 0);
    }

    #[test]
    fn test_chat_tool_calls_extracted() {
        let response = ChatCompletionResponse {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage {
                    content: None,
                    tool_calls: Some(vec![WireToolCall {
                        id: "call_1".to_string(),
                        r#type: "function".to_string(),
                        function: WireFunction {
                            name: "vector_search".to_string(),
                            arguments: r#"{"query":"rust"}"#.to_string(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: None,
        };
        let out = chat_completion(attempted(response));
        assert_eq!(out.result, "");
        let calls = out.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function_name, "vector_search");
        assert_eq!(calls[0].arguments()["query"], "rust");
    }

    #[test]
    fn test_chat_no_choices_is_empty_result() {
        let out = chat_completion(attempted(ChatCompletionResponse::default()));
        assert_eq!(out.result, "");
    }

    #[test]
    fn test_openai_embedding_sorted_by_index() {
        let response = EmbeddingResponse {
            data: vec![
                EmbeddingData {
                    index: 1,
                    embedding: EmbeddingVector::Float(vec![1.0]),
                },
                EmbeddingData {
                    index: 0,
                    embedding: EmbeddingVector::Float(vec![0.0]),
                },
            ],
            usage: Some(EmbeddingUsage {
                prompt_tokens: Some(5),
                total_tokens: Some(5),
            }),
        };
        let out = openai_embedding(attempted(response));
        assert_eq!(out.result[0], EmbeddingVector::Float(vec![0.0]));
        assert_eq!(out.prompt_tokens, Some(5));
        assert_eq!(out.total_tokens, Some(5));
    }

    fn dashscope_response(usage: DashScopeUsage) -> DashScopeResponse {
        DashScopeResponse {
            output: Some(DashScopeOutput {
                embeddings: vec![WireEmbedding {
                    index: 0,
                    embedding: Some(vec![0.25; 4]),
                    sparse_embedding: None,
                    kind: Some("text".to_string()),
                }],
            }),
            usage: Some(usage),
            request_id: Some("req-9".to_string()),
            code: None,
            message: None,
        }
    }

    #[test]
    fn test_dashscope_text_usage() {
        let out = dashscope_text(attempted(dashscope_response(DashScopeUsage {
            total_tokens: Some(7),
            ..DashScopeUsage::default()
        })));
        assert_eq!(out.total_tokens, Some(7));
        assert_eq!(out.prompt_tokens, None);
        assert_eq!(out.request_id.as_deref(), Some("req-9"));
        assert_eq!(out.result[0].embedding.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_dashscope_multimodal_defaults() {
        let out = dashscope_multimodal(attempted(dashscope_response(DashScopeUsage {
            input_tokens: Some(12),
            ..DashScopeUsage::default()
        })));
        assert_eq!(out.prompt_tokens, Some(12));
        assert_eq!(out.total_tokens, Some(12));
        assert_eq!(out.image_count, 0);
        assert_eq!(out.video_duration, 0.0);
        assert_eq!(out.result[0].kind.as_deref(), Some("text"));
    }

    #[test]
    fn test_dashscope_missing_usage() {
        let mut response = dashscope_response(DashScopeUsage::default());
        response.usage = None;
        let out = dashscope_multimodal(attempted(response));
        assert_eq!(out.total_tokens, None);
        assert_eq!(out.image_count, 0);
    }
}
