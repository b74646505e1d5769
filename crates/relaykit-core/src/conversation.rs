//! Tool-call conversation loop
//!
//! The chat client only reports tool calls; this loop executes them through a
//! [`ToolExecutor`], feeds the results back as `tool` messages and asks the
//! model again until it answers without tool calls.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::providers::openai::{ChatClient, ChatMessage, ChatRequest};
use crate::providers::types::ChatCompletion;

const MAX_TOOL_OUTPUT: usize = 100_000;

/// Executes tool calls requested by the model
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: Value) -> anyhow::Result<Value>;
}

/// What a finished conversation produced
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// Last completion; has tool calls only when the round limit was hit
    pub final_completion: ChatCompletion,
    pub rounds: u32,
    /// Names of the tools that were executed, in call order
    pub tools_used: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ToolConversation<'a> {
    chat: &'a ChatClient,
    max_rounds: u32,
}

impl<'a> ToolConversation<'a> {
    pub fn new(chat: &'a ChatClient) -> Self {
        Self {
            chat,
            max_rounds: 3,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub async fn run(
        &self,
        request: ChatRequest,
        executor: &dyn ToolExecutor,
    ) -> Result<ConversationOutcome> {
        let mut request = request;
        let mut rounds = 0;
        let mut tools_used = Vec::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        loop {
            rounds += 1;
            info!("Conversation round {}", rounds);

            let completion = self.chat.complete(&request).await?;
            input_tokens += u64::from(completion.input_tokens);
            output_tokens += u64::from(completion.output_tokens);

            let calls = match completion.tool_calls.as_deref() {
                Some(calls) if !calls.is_empty() => calls.to_vec(),
                _ => {
                    debug!("Conversation finished without tool calls after {} round(s)", rounds);
                    return Ok(ConversationOutcome {
                        final_completion: completion,
                        rounds,
                        tools_used,
                        input_tokens,
                        output_tokens,
                    });
                }
            };

            info!("Model requested {} tool call(s)", calls.len());

            if rounds >= self.max_rounds {
                warn!(
                    "Conversation hit the round limit ({}) with pending tool calls",
                    self.max_rounds
                );
                return Ok(ConversationOutcome {
                    final_completion: completion,
                    rounds,
                    tools_used,
                    input_tokens,
                    output_tokens,
                });
            }

            // The user turn moves into history so later rounds keep it
            let user = request.user_message();
            if !user.is_empty() {
                request.history.push(ChatMessage::user(user));
            }
            request.user_prompt.clear();
            request.content = None;
            request
                .history
                .push(ChatMessage::assistant(&completion.result, &calls));

            for call in &calls {
                info!("Executing tool: {}", call.function_name);
                tools_used.push(call.function_name.clone());

                let output = match executor.execute(&call.function_name, call.arguments()).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Tool {} failed: {}", call.function_name, e);
                        serde_json::json!({ "error": e.to_string() })
                    }
                };
                request
                    .history
                    .push(ChatMessage::tool(&call.id, truncate_output(output.to_string())));
            }
        }
    }
}

fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_TOOL_OUTPUT {
        let mut end = MAX_TOOL_OUTPUT;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        output.truncate(end);
        output.push_str("\n[Output truncated]");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::providers::openai::{
        ChatChoice, ChatChoiceMessage, ChatCompletionBody, ChatCompletionResponse, WireFunction,
        WireToolCall,
    };
    use crate::registry::{ProviderConfig, ProviderRegistry};
    use crate::retry::{RetryPolicy, VendorCall};
    use std::sync::{Arc, Mutex};

    /// Replays canned responses and records every body it receives
    struct ScriptedBackend {
        responses: Mutex<Vec<ChatCompletionResponse>>,
        bodies: Mutex<Vec<ChatCompletionBody>>,
    }

    impl ScriptedBackend {
        fn new(mut responses: Vec<ChatCompletionResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VendorCall<ChatCompletionBody, ChatCompletionResponse> for ScriptedBackend {
        async fn call(
            &self,
            _provider: &ProviderConfig,
            body: &ChatCompletionBody,
        ) -> Result<ChatCompletionResponse> {
            self.bodies.lock().unwrap().push(body.clone());
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolExecutor for EchoTools {
        async fn execute(&self, tool_name: &str, arguments: Value) -> anyhow::Result<Value> {
            if tool_name == "broken" {
                anyhow::bail!("tool exploded");
            }
            Ok(serde_json::json!({ "tool": tool_name, "args": arguments }))
        }
    }

    fn tool_response(name: &str, args: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage {
                    content: None,
                    tool_calls: Some(vec![WireToolCall {
                        id: format!("call_{}", name),
                        r#type: "function".to_string(),
                        function: WireFunction {
                            name: name.to_string(),
                            arguments: args.to_string(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: Some(crate::providers::openai::ChatUsage {
                prompt_tokens: Some(10),
                completion_tokens: Some(2),
            }),
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> ChatClient {
        let registry = ProviderRegistry::from_providers([ProviderConfig::new("X", "k", "http://u")]);
        ChatClient::new(Arc::new(registry))
            .with_policy(RetryPolicy::immediate())
            .with_backend(backend)
    }

    #[tokio::test]
    async fn test_no_tool_calls_single_round() {
        let backend = ScriptedBackend::new(vec![ChatCompletionResponse::text("hello", 3, 1)]);
        let chat = client(backend.clone());
        let outcome = ToolConversation::new(&chat)
            .run(ChatRequest::new("X", "m", "hi"), &EchoTools)
            .await
            .unwrap();
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.final_completion.result, "hello");
        assert!(outcome.tools_used.is_empty());
        assert_eq!(backend.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_results_fed_back() {
        let backend = ScriptedBackend::new(vec![
            tool_response("keyword_search", r#"{"keywords":["a"]}"#),
            ChatCompletionResponse::text("final answer", 20, 5),
        ]);
        let chat = client(backend.clone());
        let request = ChatRequest::new("X", "m", "question")
            .with_system_prompt("sys")
            .with_tool_choice(serde_json::json!("auto"));
        let outcome = ToolConversation::new(&chat).run(request, &EchoTools).await.unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.final_completion.result, "final answer");
        assert_eq!(outcome.tools_used, vec!["keyword_search"]);
        assert_eq!(outcome.input_tokens, 30);
        assert_eq!(outcome.output_tokens, 7);

        let bodies = backend.bodies.lock().unwrap();
        let second = &bodies[1].messages;
        let roles: Vec<&str> = second.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(second[1].content.as_deref(), Some("question"));
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_keyword_search"));
        let tool_output: Value = serde_json::from_str(second[3].content.as_deref().unwrap()).unwrap();
        assert_eq!(tool_output["args"]["keywords"][0], "a");
    }

    #[tokio::test]
    async fn test_tool_failure_reported_to_model() {
        let backend = ScriptedBackend::new(vec![
            tool_response("broken", "{}"),
            ChatCompletionResponse::text("sorry", 1, 1),
        ]);
        let chat = client(backend.clone());
        ToolConversation::new(&chat)
            .run(ChatRequest::new("X", "m", "q"), &EchoTools)
            .await
            .unwrap();
        let bodies = backend.bodies.lock().unwrap();
        let tool_msg = bodies[1].messages.last().unwrap();
        assert!(tool_msg.content.as_deref().unwrap().contains("tool exploded"));
    }

    #[tokio::test]
    async fn test_round_limit_stops_loop() {
        let backend = ScriptedBackend::new(vec![
            tool_response("vector_search", "{}"),
            tool_response("vector_search", "{}"),
            tool_response("vector_search", "{}"),
        ]);
        let chat = client(backend.clone());
        let outcome = ToolConversation::new(&chat)
            .with_max_rounds(2)
            .run(ChatRequest::new("X", "m", "q"), &EchoTools)
            .await
            .unwrap();
        assert_eq!(outcome.rounds, 2);
        assert!(outcome.final_completion.has_tool_calls());
        assert_eq!(backend.bodies.lock().unwrap().len(), 2);
        // only the first round's call ran; the second is left pending
        assert_eq!(outcome.tools_used, vec!["vector_search"]);
    }

    /// Counts executions so tests can tell requested tools from executed ones
    #[derive(Default)]
    struct CountingTools {
        executed: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl ToolExecutor for CountingTools {
        async fn execute(&self, _tool_name: &str, _arguments: Value) -> anyhow::Result<Value> {
            self.executed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(serde_json::json!({"total": 0}))
        }
    }

    #[tokio::test]
    async fn test_pending_calls_at_limit_are_not_reported_as_used() {
        let backend = ScriptedBackend::new(vec![tool_response("vector_search", "{}")]);
        let chat = client(backend);
        let tools = CountingTools::default();
        let outcome = ToolConversation::new(&chat)
            .with_max_rounds(1)
            .run(ChatRequest::new("X", "m", "q"), &tools)
            .await
            .unwrap();
        assert_eq!(tools.executed.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(outcome.tools_used.is_empty());
        let pending = outcome.final_completion.tool_calls.unwrap();
        assert_eq!(pending[0].function_name, "vector_search");
    }

    #[tokio::test]
    async fn test_unknown_provider_propagates() {
        let backend = ScriptedBackend::new(vec![]);
        let chat = client(backend);
        let err = ToolConversation::new(&chat)
            .run(ChatRequest::new("NOPE", "m", "q"), &EchoTools)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_truncate_output() {
        let long = "x".repeat(MAX_TOOL_OUTPUT + 10);
        let out = truncate_output(long);
        assert!(out.ends_with("[Output truncated]"));
        assert_eq!(truncate_output("short".to_string()), "short");
    }
}
