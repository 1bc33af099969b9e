use crate::core_types::{LLMResponse, Message, Role, ToolCall};
use crate::errors::AgentError;
use crate::llm::{CompletionModel, ToolMetadata};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for OpenAI-compatible chat-completion endpoints with function
/// calling enabled. Tool choice is always `required`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: "https://api.openai.com/v1".to_string(),
            model,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Apply a connection-level request timeout. The loop controller also
    /// enforces its own per-call deadline; this guards the HTTP layer itself.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        self
    }

    fn build_request_body(&self, messages: &[Message], tools: &[ToolMetadata]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(messages),
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }

        if !tools.is_empty() {
            let formatted_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema
                        }
                    })
                })
                .collect();
            body["tools"] = formatted_tools.into();
            // The autonomous loop depends on the model acting through tools,
            // never through plain prose.
            body["tool_choice"] = "required".into();
        }

        body
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut message = json!({
                    "role": self.format_role(&msg.role),
                    "content": msg.content
                });

                if let Role::Tool = msg.role {
                    if let Some(tool_call_id) = &msg.tool_call_id {
                        message["tool_call_id"] = json!(tool_call_id);
                    }
                }

                if let Role::Assistant = msg.role {
                    if let Some(tool_calls) = &msg.tool_calls {
                        if !tool_calls.is_empty() {
                            let formatted: Vec<Value> = tool_calls
                                .iter()
                                .map(|tc| {
                                    json!({
                                        "id": tc.id.clone().unwrap_or_else(|| {
                                            format!("call_{}", uuid::Uuid::new_v4().simple())
                                        }),
                                        "type": "function",
                                        "function": {
                                            "name": tc.name,
                                            "arguments": tc.arguments.to_string()
                                        }
                                    })
                                })
                                .collect();
                            message["tool_calls"] = json!(formatted);
                        }
                    }
                }

                message
            })
            .collect()
    }

    fn format_role(&self, role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn parse_response(&self, response: Value) -> Result<LLMResponse, AgentError> {
        let choices = response["choices"]
            .as_array()
            .ok_or_else(|| AgentError::ParsingError("No choices in response".to_string()))?;

        if choices.is_empty() {
            return Err(AgentError::ParsingError("Empty choices array".to_string()));
        }

        let choice = &choices[0];
        let message = &choice["message"];

        let content = message["content"].as_str().map(|s| s.to_string());
        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());

        let tool_calls = if let Some(calls) = message["tool_calls"].as_array() {
            let mut parsed_calls = Vec::new();
            for call in calls {
                let id = call["id"].as_str().map(|s| s.to_string());
                let function = &call["function"];
                let Some(name) = function["name"].as_str() else {
                    continue;
                };
                let arguments_str = function["arguments"].as_str().unwrap_or("{}");
                // A call with unparseable argument JSON still reaches the
                // dispatcher, which reports it back to the model as a
                // dispatch error instead of aborting the run.
                let arguments: Value = serde_json::from_str(arguments_str).unwrap_or_else(|e| {
                    log::warn!(
                        "Tool call '{}' carried invalid argument JSON ({}), passing through raw",
                        name,
                        e
                    );
                    Value::String(arguments_str.to_string())
                });

                parsed_calls.push(ToolCall {
                    id,
                    name: name.to_string(),
                    arguments,
                });
            }
            if parsed_calls.is_empty() {
                None
            } else {
                Some(parsed_calls)
            }
        } else {
            None
        };

        if content.is_none() && tool_calls.is_none() {
            return Err(AgentError::ParsingError(
                "Response has neither content nor tool calls".to_string(),
            ));
        }

        Ok(LLMResponse {
            content,
            tool_calls,
            finish_reason,
            usage: None,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: &[ToolMetadata],
    ) -> Result<LLMResponse, AgentError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(&messages, tools);

        log::debug!("Chat completion request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::LLMError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| AgentError::LLMError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::LLMError(format!(
                "API request failed with status {}: {}",
                status, response_text
            )));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|e| AgentError::ParsingError(format!("Invalid JSON response: {}", e)))?;

        self.parse_response(response_json)
    }
}
