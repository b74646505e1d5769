//! OpenAI-compatible chat completions (OpenAI, OpenRouter, DashScope
//! compatible mode, local servers, ...)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, trace};

use crate::error::{Error, Result, TransientError};
use crate::normalize;
use crate::registry::{ProviderConfig, ProviderRegistry};
use crate::retry::{RequestDescriptor, RetryExecutor, RetryPolicy, VendorCall};

use super::http::{build_client, decode, post_json};
use super::types::{ChatCompletion, ToolCall};

const CONTENT_START: &str = "-----Content START-----";
const CONTENT_END: &str = "-----Content END-----";

/// One message in OpenAI wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    /// Assistant turn that requested `tool_calls`
    pub fn assistant(content: impl Into<String>, tool_calls: &[ToolCall]) -> Self {
        let content = content.into();
        Self {
            role: "assistant".to_string(),
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.iter().map(WireToolCall::from).collect())
            },
            tool_call_id: None,
        }
    }

    /// Result of executing the tool call `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: function_type(),
            function: WireFunction {
                name: call.function_name.clone(),
                arguments: call.function_arguments.clone(),
            },
        }
    }
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        Self {
            id: call.id,
            function_name: call.function.name,
            function_arguments: call.function.arguments,
        }
    }
}

/// Build an OpenAI function tool definition
pub fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// A chat completion request as the caller describes it
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub user_prompt: String,
    /// Appended to the prompt between content markers
    pub content: Option<String>,
    /// No system message is sent when absent or empty
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<Value>,
    pub n: u32,
    pub temperature: Option<f32>,
    pub tools: Vec<Value>,
    pub tool_choice: Option<Value>,
    /// Earlier turns, sent between the system message and the user message
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            user_prompt: user_prompt.into(),
            content: None,
            system_prompt: None,
            max_tokens: None,
            response_format: None,
            n: 1,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
            history: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: Value) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = n;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: Value) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// The user turn: the prompt, plus the content block when present
    pub fn user_message(&self) -> String {
        match self.content.as_deref() {
            Some(content) if !content.is_empty() => format!(
                "{}\n\n{}\n{}\n{}",
                self.user_prompt, CONTENT_START, content, CONTENT_END
            ),
            _ => self.user_prompt.clone(),
        }
    }

    /// Messages in send order: system, history, user.
    /// The user message is omitted when it is empty and history is not.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = self.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.history.iter().cloned());
        let user = self.user_message();
        if !user.is_empty() || self.history.is_empty() {
            messages.push(ChatMessage::user(user));
        }
        messages
    }

    /// Wire body for `/chat/completions`
    pub fn to_body(&self) -> Result<ChatCompletionBody> {
        if self.model.is_empty() {
            return Err(Error::input("model must not be empty"));
        }
        if self.n == 0 {
            return Err(Error::input("n must be at least 1"));
        }
        Ok(ChatCompletionBody {
            model: self.model.clone(),
            messages: self.messages(),
            n: self.n,
            max_tokens: self.max_tokens.filter(|&t| t > 0),
            temperature: self.temperature,
            response_format: self.response_format.clone(),
            tools: if self.tools.is_empty() {
                None
            } else {
                Some(self.tools.clone())
            },
            tool_choice: self.tool_choice.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

// ── OpenAI wire response ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
}

impl ChatCompletionResponse {
    /// Single-choice text response, handy for stub backends
    pub fn text(content: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            choices: vec![ChatChoice {
                message: ChatChoiceMessage {
                    content: Some(content.to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: Some(prompt_tokens),
                completion_tokens: Some(completion_tokens),
            }),
        }
    }
}

/// Decode a chat completion body, rejecting vendor errors and empty answers
pub fn decode_chat_response(value: Value) -> Result<ChatCompletionResponse> {
    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        return Err(TransientError::Vendor {
            code: err
                .get("code")
                .map(|c| c.to_string().trim_matches('"').to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| err.as_str())
                .unwrap_or("no message")
                .to_string(),
        }
        .into());
    }

    let response: ChatCompletionResponse = decode(value, "chat completion")?;
    let first = response
        .choices
        .first()
        .ok_or_else(|| TransientError::unexpected("chat completion had no choices"))?;
    let has_tool_calls = first
        .message
        .tool_calls
        .as_ref()
        .is_some_and(|c| !c.is_empty());
    if first.message.content.is_none() && !has_tool_calls {
        return Err(TransientError::unexpected(
            "chat completion carried neither content nor tool calls",
        )
        .into());
    }
    Ok(response)
}

/// Sends chat completion bodies over HTTP
pub struct HttpChatBackend {
    client: Client,
}

impl std::fmt::Debug for HttpChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatBackend").finish()
    }
}

impl Default for HttpChatBackend {
    fn default() -> Self {
        Self {
            client: build_client(),
        }
    }
}

#[async_trait]
impl VendorCall<ChatCompletionBody, ChatCompletionResponse> for HttpChatBackend {
    async fn call(
        &self,
        provider: &ProviderConfig,
        body: &ChatCompletionBody,
    ) -> Result<ChatCompletionResponse> {
        let url = provider.endpoint("chat/completions");
        let value = post_json(&self.client, &url, &provider.api_key, body).await?;
        decode_chat_response(value)
    }
}

pub type ChatBackend = dyn VendorCall<ChatCompletionBody, ChatCompletionResponse>;

/// Chat completion client with retry and normalization
#[derive(Clone)]
pub struct ChatClient {
    executor: RetryExecutor,
    backend: Arc<ChatBackend>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("providers", &self.executor.registry().len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ChatClient {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            executor: RetryExecutor::new(registry),
            backend: Arc::new(HttpChatBackend::default()),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the HTTP backend (stubs, recording proxies)
    pub fn with_backend(mut self, backend: Arc<ChatBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Run one chat completion, retrying transient failures
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let body = request.to_body()?;

        if let Some(system) = request.system_prompt.as_deref() {
            trace!("System message: {}", system);
        }
        trace!("User message: {}", request.user_message());
        if let Some(format) = &request.response_format {
            trace!("Response format: {}", format);
        }

        let descriptor = RequestDescriptor::new(&request.provider, &request.model, body)
            .with_policy(self.policy);
        let attempted = self.executor.execute(descriptor, self.backend.as_ref()).await?;
        let completion = normalize::chat_completion(attempted);

        info!(
            "Processing {} API completed. Input tokens: {}, Output tokens: {}",
            request.provider, completion.input_tokens, completion.output_tokens
        );
        Ok(completion)
    }
}
