use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use uuid::Uuid;

/// Immutable trace of one proxied request. The trace id doubles as the
/// search-document id, so re-submitting the same entry is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub trace_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub virtual_key_name: String,
    pub virtual_key_id: Uuid,
    pub user_id: Uuid,
    pub request: RequestLog,
    pub response: ResponseLog,
    pub metrics: MetricsLog,
}

/// The opaque message/prompt payload of a request. The index field is
/// text, not object, so both variants serialise to a single string at the
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessages {
    Json(JsonValue),
    Text(String),
}

impl LogMessages {
    pub fn as_index_string(&self) -> String {
        match self {
            LogMessages::Json(value) => value.to_string(),
            LogMessages::Text(text) => text.clone(),
        }
    }
}

impl From<JsonValue> for LogMessages {
    fn from(value: JsonValue) -> Self {
        LogMessages::Json(value)
    }
}

impl Serialize for LogMessages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_index_string())
    }
}

impl<'de> Deserialize<'de> for LogMessages {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(LogMessages::Text(String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestLog {
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<LogMessages>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseLog {
    #[serde(default)]
    pub content: String,
    pub usage: UsageLog,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageLog {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsLog {
    pub latency_ms: i64,
    pub cost_usd: f64,
}

/// Aggregate answer for the dashboard overview.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Overview {
    pub total_spend: f64,
    pub total_requests: i64,
    pub avg_latency: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_messages_index_as_a_string() {
        let request = RequestLog {
            model: "openai/gpt-4o".to_string(),
            provider: "openai".to_string(),
            messages: Some(json!([{"role": "user", "content": "hi"}]).into()),
            ..Default::default()
        };
        let doc = serde_json::to_value(&request).unwrap();
        let messages = doc["messages"].as_str().expect("messages must be a string");
        assert_eq!(messages, r#"[{"content":"hi","role":"user"}]"#);
    }

    #[test]
    fn text_messages_pass_through_unchanged() {
        let messages = LogMessages::Text("already a string".to_string());
        assert_eq!(
            serde_json::to_value(&messages).unwrap(),
            json!("already a string")
        );
    }

    #[test]
    fn messages_read_back_from_the_index_as_text() {
        let parsed: LogMessages = serde_json::from_value(json!("[{\"role\":\"user\"}]")).unwrap();
        assert_eq!(parsed, LogMessages::Text("[{\"role\":\"user\"}]".to_string()));
    }

    #[test]
    fn absent_optionals_are_omitted_from_the_doc() {
        let request = RequestLog {
            model: "openai/gpt-4o".to_string(),
            provider: "openai".to_string(),
            ..Default::default()
        };
        let doc = serde_json::to_value(&request).unwrap();
        let object = doc.as_object().unwrap();
        assert!(!object.contains_key("messages"));
        assert!(!object.contains_key("prompt"));
        assert!(!object.contains_key("temperature"));
        assert!(!object.contains_key("max_tokens"));
    }
}
