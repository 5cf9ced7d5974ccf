use crate::traits::{InvocationRequest, InvocationResult};
use serde_json::Value;

const BINARY_MIN_LEN: usize = 256;

/// Textual form of one executed step, as folded into the conversation.
pub fn render_observation(
    step: usize,
    request: &InvocationRequest,
    result: &InvocationResult,
    max_chars: usize,
) -> String {
    let arguments = elide_binary(&Value::Object(request.arguments.clone())).to_string();
    let call = format!("{}({})", request.capability, truncate(&arguments, max_chars));

    match result {
        InvocationResult::Success { payload } => format!(
            "Step {step}: {call} succeeded.\n{}",
            summarize_payload(payload, max_chars)
        ),
        InvocationResult::Failure {
            reason,
            recoverable: true,
        } => format!("Step {step}: {call} failed (recoverable): {reason}"),
        InvocationResult::Failure {
            reason,
            recoverable: false,
        } => format!("Step {step}: {call} failed (fatal): {reason}"),
    }
}

/// Bounded text rendering of a payload. Binary-looking strings are elided and
/// the result is cut at `max_chars` characters.
pub fn summarize_payload(payload: &Value, max_chars: usize) -> String {
    let cleaned = elide_binary(payload);
    let text = match &cleaned {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    truncate(&text, max_chars)
}

fn elide_binary(value: &Value) -> Value {
    match value {
        Value::String(s) if looks_binary(s) => {
            Value::String(format!("<binary data elided, {} bytes>", s.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(elide_binary).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), elide_binary(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn looks_binary(s: &str) -> bool {
    if s.starts_with("data:") && s.contains(";base64,") {
        return true;
    }

    s.len() >= BINARY_MIN_LEN
        && !s.contains(char::is_whitespace)
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'-' | b'_'))
}

fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n[... truncated, {} more chars]", total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn long_payload_is_truncated() {
        let payload = Value::String("x".repeat(50));
        let summary = summarize_payload(&payload, 10);
        assert!(summary.starts_with("xxxxxxxxxx\n[... truncated, 40 more chars]"));
    }

    #[test]
    fn base64_blobs_are_elided() {
        let payload = json!({
            "path": "charts/sales.json",
            "image": format!("data:image/png;base64,{}", "QUJD".repeat(10)),
            "raw": "A".repeat(300),
        });

        let summary = summarize_payload(&payload, 2_000);
        assert!(summary.contains("charts/sales.json"));
        assert!(summary.contains("<binary data elided"));
        assert!(!summary.contains("QUJDQUJD"));
        assert!(!summary.contains(&"A".repeat(300)));
    }

    #[test]
    fn failure_reason_is_verbatim() {
        let request = InvocationRequest::new(
            "data_visualization",
            json!({ "chart_type": "radar" }).as_object().cloned().unwrap(),
        );
        let text = render_observation(
            2,
            &request,
            &InvocationResult::failure("unsupported chart type 'radar'", true),
            100,
        );
        assert_eq!(
            text,
            "Step 2: data_visualization({\"chart_type\":\"radar\"}) failed (recoverable): unsupported chart type 'radar'"
        );
    }

    #[test]
    fn long_arguments_are_truncated() {
        let request = InvocationRequest::new(
            "report_generator",
            json!({ "analysis_results": "finding ".repeat(500) })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let text = render_observation(
            5,
            &request,
            &InvocationResult::success(json!({ "path": "reports/r.md" })),
            100,
        );

        assert!(text.starts_with("Step 5: report_generator({\"analysis_results\":\"finding"));
        assert!(text.contains("[... truncated,"));
        assert!(text.contains("reports/r.md"));
        assert!(text.chars().count() < 300);
    }
}
