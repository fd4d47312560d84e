//! Usage and content extraction from buffered upstream responses.

use lumina_logs::UsageLog;
use serde_json::Value as JsonValue;

/// Token counts from the OpenAI-shaped `usage` object; zeros when absent.
pub fn extract_usage(body: &JsonValue) -> UsageLog {
    let mut usage = UsageLog::default();
    if let Some(counts) = body.get("usage") {
        usage.prompt_tokens = counts
            .get("prompt_tokens")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        usage.completion_tokens = counts
            .get("completion_tokens")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    }
    usage
}

/// Response text, whichever protocol shape the upstream used: OpenAI
/// `choices[0].message.content` or Anthropic `content[0].text`.
pub fn extract_content(body: &JsonValue) -> String {
    if let Some(content) = body
        .pointer("/choices/0/message/content")
        .and_then(JsonValue::as_str)
    {
        return content.to_string();
    }
    if let Some(text) = body.pointer("/content/0/text").and_then(JsonValue::as_str) {
        return text.to_string();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_usage_is_read_and_totalled() {
        let body = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 20}});
        let usage = extract_usage(&body);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 20);
        assert_eq!(usage.total_tokens, 30);
    }

    #[test]
    fn missing_usage_yields_zeros() {
        assert_eq!(extract_usage(&json!({})).total_tokens, 0);
        assert_eq!(
            extract_usage(&json!({"usage": {"input_tokens": 5}})).total_tokens,
            0
        );
    }

    #[test]
    fn openai_content_shape() {
        let body = json!({"choices": [{"message": {"content": "hello there"}}]});
        assert_eq!(extract_content(&body), "hello there");
    }

    #[test]
    fn anthropic_content_shape() {
        let body = json!({"content": [{"type": "text", "text": "hi from claude"}]});
        assert_eq!(extract_content(&body), "hi from claude");
    }

    #[test]
    fn unknown_shapes_yield_empty_content() {
        assert_eq!(extract_content(&json!({"data": []})), "");
        assert_eq!(extract_content(&json!({"choices": []})), "");
    }
}
