use crate::agent::context::{ContextBuilder, DecisionMode};
use crate::error::ReasoningServiceError;
use crate::session::ConversationTurn;
use crate::traits::{
    Arguments, CapabilityDescriptor, ChatRequest, ChatResponse, InvocationRequest, Provider,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_TEMPERATURE: f64 = 0.1;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// What the reasoning service wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Invoke(InvocationRequest),
    Respond(String),
}

/// Thin proxy to the reasoning service: turns transcript + manifest into a
/// [`Decision`], retrying a failed transport once after a short backoff.
pub struct ReasoningClient {
    provider: Arc<dyn Provider>,
    context_builder: ContextBuilder,
    temperature: f64,
    retry_backoff: Duration,
}

impl ReasoningClient {
    pub fn new(provider: Arc<dyn Provider>, context_builder: ContextBuilder) -> Self {
        Self {
            provider,
            context_builder,
            temperature: DEFAULT_TEMPERATURE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn decide(
        &self,
        history: &[ConversationTurn],
        manifest: &[CapabilityDescriptor],
        mode: DecisionMode,
    ) -> Result<Decision, ReasoningServiceError> {
        let messages = self.context_builder.build_messages(history, manifest, mode);
        let request = ChatRequest {
            messages: &messages,
            tools: if manifest.is_empty() {
                None
            } else {
                Some(manifest)
            },
            temperature: self.temperature,
        };

        let response = match self.attempt(request).await {
            Ok(response) => response,
            Err(first) => {
                warn!(
                    provider = self.provider.name(),
                    error = %first,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "Reasoning call failed, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.attempt(request).await?
            }
        };

        parse_decision(&response)
    }

    /// One round trip. Only transport failures surface here, so a malformed
    /// reply is never retried.
    async fn attempt(&self, request: ChatRequest<'_>) -> Result<ChatResponse, ReasoningServiceError> {
        self.provider
            .chat(request)
            .await
            .map_err(|e| ReasoningServiceError::Transport(format!("{e:#}")))
    }
}

/// Native tool calls win; otherwise `<tool_call>` blocks in the text are
/// parsed; otherwise the text is the final answer. Only the first call is
/// used since steps run strictly one at a time.
pub fn parse_decision(response: &ChatResponse) -> Result<Decision, ReasoningServiceError> {
    if let Some(first) = response.tool_calls.first() {
        if response.tool_calls.len() > 1 {
            warn!(
                dropped = response.tool_calls.len() - 1,
                "Reasoning service returned several tool calls; running only the first"
            );
        }
        let arguments = parse_arguments(&first.name, &first.arguments)?;
        return Ok(Decision::Invoke(InvocationRequest::new(
            first.name.clone(),
            arguments,
        )));
    }

    let text = response.text_or_empty().trim();
    if text.is_empty() {
        return Err(ReasoningServiceError::Empty);
    }

    if text.contains(TOOL_CALL_OPEN) {
        let mut calls = parse_tagged_calls(text)?;
        if calls.len() > 1 {
            warn!(
                dropped = calls.len() - 1,
                "Reasoning service embedded several tool calls; running only the first"
            );
        }
        debug!("Parsed tool call from text fallback");
        return Ok(Decision::Invoke(calls.swap_remove(0)));
    }

    Ok(Decision::Respond(text.to_string()))
}

fn parse_arguments(name: &str, raw: &str) -> Result<Arguments, ReasoningServiceError> {
    if raw.trim().is_empty() {
        return Ok(Arguments::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Arguments::new()),
        Ok(other) => Err(ReasoningServiceError::Malformed(format!(
            "arguments for {name} must be an object, got {other}"
        ))),
        Err(e) => Err(ReasoningServiceError::Malformed(format!(
            "arguments for {name} are not valid JSON: {e}"
        ))),
    }
}

fn parse_tagged_calls(text: &str) -> Result<Vec<InvocationRequest>, ReasoningServiceError> {
    let mut calls = Vec::new();
    let mut remaining = text;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN) {
        let after_open = &remaining[start + TOOL_CALL_OPEN.len()..];
        let Some(close) = after_open.find(TOOL_CALL_CLOSE) else {
            return Err(ReasoningServiceError::Malformed(
                "unterminated <tool_call> block".to_string(),
            ));
        };

        for value in extract_json_objects(&after_open[..close]) {
            calls.push(tool_call_from_value(&value)?);
        }
        remaining = &after_open[close + TOOL_CALL_CLOSE.len()..];
    }

    if calls.is_empty() {
        return Err(ReasoningServiceError::Malformed(
            "<tool_call> block did not contain a JSON tool call".to_string(),
        ));
    }
    Ok(calls)
}

fn tool_call_from_value(value: &Value) -> Result<InvocationRequest, ReasoningServiceError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ReasoningServiceError::Malformed("tool call without a name".to_string()))?;

    let arguments = match value.get("arguments") {
        None | Some(Value::Null) => Arguments::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => parse_arguments(name, raw)?,
        Some(other) => {
            return Err(ReasoningServiceError::Malformed(format!(
                "arguments for {name} must be an object, got {other}"
            )));
        }
    };

    Ok(InvocationRequest::new(name, arguments))
}

/// Top-level `{...}` values in `text`, skipping braces inside strings.
fn extract_json_objects(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                    && let Ok(value) = serde_json::from_str::<Value>(&text[s..=i])
                {
                    values.push(value);
                }
            }
            _ => {}
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedProvider;
    use crate::traits::ToolCall;
    use serde_json::json;

    fn client(provider: Arc<ScriptedProvider>) -> ReasoningClient {
        ReasoningClient::new(provider, ContextBuilder::new("/tmp/ws"))
            .with_retry_backoff(Duration::ZERO)
    }

    #[test]
    fn native_tool_call_becomes_invoke() {
        let response = ChatResponse::tool_call("data_query", json!({ "group_by": "product" }));
        let decision = parse_decision(&response).unwrap();
        assert_eq!(
            decision,
            Decision::Invoke(InvocationRequest::new(
                "data_query",
                json!({ "group_by": "product" }).as_object().cloned().unwrap()
            ))
        );
    }

    #[test]
    fn only_first_of_several_calls_is_used() {
        let response = ChatResponse {
            text: None,
            tool_calls: vec![
                ToolCall {
                    id: "a".into(),
                    name: "data_inspector".into(),
                    arguments: "{}".into(),
                },
                ToolCall {
                    id: "b".into(),
                    name: "data_query".into(),
                    arguments: "{}".into(),
                },
            ],
        };

        match parse_decision(&response).unwrap() {
            Decision::Invoke(request) => assert_eq!(request.capability, "data_inspector"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tagged_call_in_text_is_parsed() {
        let text = "Let me look.\n<tool_call>\n{\"name\": \"data_profiling\", \"arguments\": {\"profile_type\": \"missing {x}\"}}\n</tool_call>";
        match parse_decision(&ChatResponse::text(text)).unwrap() {
            Decision::Invoke(request) => {
                assert_eq!(request.capability, "data_profiling");
                assert_eq!(request.arguments["profile_type"], "missing {x}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_a_response() {
        let decision = parse_decision(&ChatResponse::text("  Total sales: 42  ")).unwrap();
        assert_eq!(decision, Decision::Respond("Total sales: 42".to_string()));
    }

    #[test]
    fn malformed_and_empty_responses_are_errors() {
        let bad_args = ChatResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: "a".into(),
                name: "data_query".into(),
                arguments: "[1, 2]".into(),
            }],
        };
        assert!(matches!(
            parse_decision(&bad_args),
            Err(ReasoningServiceError::Malformed(_))
        ));
        assert!(matches!(
            parse_decision(&ChatResponse::text("<tool_call>not json</tool_call>")),
            Err(ReasoningServiceError::Malformed(_))
        ));
        assert_eq!(
            parse_decision(&ChatResponse::default()),
            Err(ReasoningServiceError::Empty)
        );
    }

    #[tokio::test]
    async fn transport_failure_is_retried_once() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error("connection reset");
        provider.push_response(ChatResponse::text("done"));

        let decision = client(provider.clone())
            .decide(&[ConversationTurn::user("hi")], &[], DecisionMode::Normal)
            .await
            .unwrap();

        assert_eq!(decision, Decision::Respond("done".to_string()));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn second_failure_surfaces() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error("connection reset");
        provider.push_error("503 service unavailable");
        provider.push_response(ChatResponse::text("never reached"));

        let err = client(provider.clone())
            .decide(&[ConversationTurn::user("hi")], &[], DecisionMode::Normal)
            .await
            .unwrap_err();

        assert!(matches!(err, ReasoningServiceError::Transport(ref m) if m.contains("503")));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(ChatResponse::default());
        provider.push_response(ChatResponse::text("never reached"));

        let err = client(provider.clone())
            .decide(&[ConversationTurn::user("hi")], &[], DecisionMode::Normal)
            .await
            .unwrap_err();

        assert_eq!(err, ReasoningServiceError::Empty);
        assert_eq!(provider.call_count(), 1);
    }
}
