use crate::traits::{
    CapabilityDescriptor, ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FunctionTool<'a> {
    r#type: &'a str,
    function: FunctionDefinition<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition<'a> {
    name: &'a str,
    description: &'a str,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Chat-completions client for any OpenAI-compatible endpoint (OpenAI,
/// OpenRouter, GLM, Ollama's `/v1`).
pub struct OpenAICompatibleProvider {
    client: reqwest::Client,
    label: String,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAICompatibleProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let api_key = api_key.into();
        Self {
            client,
            label: "openai".to_string(),
            api_key: (!api_key.is_empty()).then_some(api_key),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_tools<'a>(&self, tools: &'a [CapabilityDescriptor]) -> Vec<FunctionTool<'a>> {
        tools
            .iter()
            .map(|descriptor| FunctionTool {
                r#type: "function",
                function: FunctionDefinition {
                    name: &descriptor.name,
                    description: &descriptor.description,
                    parameters: descriptor.json_schema(),
                },
            })
            .collect()
    }

    fn build_body<'a>(&'a self, request: &ChatRequest<'a>) -> CompletionRequest<'a> {
        let tools = request
            .tools
            .filter(|tools| !tools.is_empty())
            .map(|tools| self.convert_tools(tools));

        CompletionRequest {
            model: &self.model,
            messages: request.messages,
            temperature: request.temperature,
            tool_choice: tools.as_ref().map(|_| "auto"),
            tools,
        }
    }
}

fn into_chat_response(response: CompletionResponse) -> anyhow::Result<ChatResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolCall {
            id: if call.id.is_empty() {
                format!("call_{i}")
            } else {
                call.id
            },
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(ChatResponse {
        text: choice.message.content,
        tool_calls,
    })
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = self.build_body(&request);

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "{} API error {}: {}",
                self.label,
                status,
                error_text
            ));
        }

        let parsed: CompletionResponse = response.json().await?;
        into_chat_response(parsed)
    }
}
