use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::entry::{LogEntry, Overview};
use crate::error::LogError;

/// The single index all traces land in.
pub const INDEX_NAME: &str = "lumina-logs";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Filters for a log search. `offset`/`size` page through results sorted
/// by timestamp descending.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub model: Option<String>,
    pub status: Option<i64>,
    pub from_ts: Option<OffsetDateTime>,
    pub to_ts: Option<OffsetDateTime>,
    pub offset: u64,
    pub size: u64,
}

/// Thin HTTP client for the search backend. Speaks the raw `_bulk`,
/// `_search` and `_doc` JSON APIs.
#[derive(Clone)]
pub(crate) struct SearchClient {
    base_url: String,
    http: reqwest::Client,
}

impl SearchClient {
    pub(crate) fn new(base_url: &str) -> Result<Self, LogError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    /// PUT the index mapping. A 400 means the index already exists and is
    /// swallowed.
    pub(crate) async fn ensure_index(&self) -> Result<(), LogError> {
        let response = self
            .http
            .put(format!("{}/{INDEX_NAME}", self.base_url))
            .json(&index_mapping())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 400 {
            Ok(())
        } else {
            Err(LogError::UnexpectedStatus(status.as_u16()))
        }
    }

    /// Bulk-index a batch. Parses the per-document results: individual
    /// failures are logged and reported in aggregate, never retried.
    pub(crate) async fn bulk(&self, entries: &[LogEntry]) -> Result<(), LogError> {
        let body = bulk_body(entries)?;
        let response = self
            .http
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LogError::UnexpectedStatus(status.as_u16()));
        }

        let bulk: BulkResponse = response.json().await?;
        if !bulk.errors {
            return Ok(());
        }
        let mut failed = 0;
        for item in &bulk.items {
            if let Some(error) = &item.index.error {
                failed += 1;
                error!(
                    id = %item.index.id,
                    status = item.index.status,
                    error_type = %error.kind,
                    reason = %error.reason,
                    "document index failed"
                );
            }
        }
        Err(LogError::BulkFailed {
            failed,
            total: bulk.items.len(),
        })
    }

    pub(crate) async fn get(&self, trace_id: Uuid) -> Result<Option<LogEntry>, LogError> {
        let response = self
            .http
            .get(format!("{}/{INDEX_NAME}/_doc/{trace_id}", self.base_url))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(LogError::UnexpectedStatus(status.as_u16()));
        }
        let doc: DocResponse = response.json().await?;
        Ok(Some(doc.source))
    }

    pub(crate) async fn search(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<LogEntry>, i64), LogError> {
        let body = search_body(params)?;
        let response: SearchResponse = self.post_search(&body).await?;
        let entries = response
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.source)
            .collect();
        Ok((entries, response.hits.total.value))
    }

    pub(crate) async fn stats(
        &self,
        user_id: Uuid,
        from_ts: OffsetDateTime,
        to_ts: OffsetDateTime,
    ) -> Result<Overview, LogError> {
        let body = stats_body(user_id, from_ts, to_ts)?;
        let response: StatsResponse = self.post_search(&body).await?;

        let total = response.hits.total.value;
        let success_rate = if total > 0 {
            response.aggregations.success_count.doc_count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok(Overview {
            total_spend: response.aggregations.total_cost.value.unwrap_or(0.0),
            total_requests: total,
            avg_latency: response.aggregations.avg_latency.value.unwrap_or(0.0),
            success_rate,
        })
    }

    async fn post_search<T: for<'de> Deserialize<'de>>(
        &self,
        body: &JsonValue,
    ) -> Result<T, LogError> {
        let response = self
            .http
            .post(format!("{}/{INDEX_NAME}/_search", self.base_url))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LogError::UnexpectedStatus(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Alternating action/document NDJSON lines for `_bulk`. The action pins
/// `_id` to the trace id, so replays dedupe at the index.
pub fn bulk_body(entries: &[LogEntry]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for entry in entries {
        let action = json!({
            "index": { "_index": INDEX_NAME, "_id": entry.trace_id }
        });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(entry)?);
        body.push('\n');
    }
    Ok(body)
}

fn search_body(params: &SearchParams) -> Result<JsonValue, LogError> {
    let mut must = Vec::new();

    if let Some(query) = params.query.as_deref().filter(|q| !q.is_empty()) {
        must.push(json!({
            "multi_match": {
                "query": query,
                "fields": ["request.messages", "response.content"],
            }
        }));
    }
    if let Some(model) = params.model.as_deref().filter(|m| !m.is_empty()) {
        must.push(json!({ "term": { "request.model": model } }));
    }
    if let Some(status) = params.status {
        must.push(json!({ "term": { "response.status_code": status } }));
    }
    if params.from_ts.is_some() || params.to_ts.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from_ts) = params.from_ts {
            range.insert("gte".to_string(), json!(from_ts.format(&Rfc3339)?));
        }
        if let Some(to_ts) = params.to_ts {
            range.insert("lte".to_string(), json!(to_ts.format(&Rfc3339)?));
        }
        must.push(json!({ "range": { "timestamp": range } }));
    }

    Ok(json!({
        "query": { "bool": { "must": must } },
        "sort": [ { "timestamp": { "order": "desc" } } ],
        "from": params.offset,
        "size": params.size,
    }))
}

fn stats_body(
    user_id: Uuid,
    from_ts: OffsetDateTime,
    to_ts: OffsetDateTime,
) -> Result<JsonValue, LogError> {
    Ok(json!({
        "query": {
            "bool": {
                "must": [
                    { "term": { "user_id": user_id } },
                    { "range": { "timestamp": {
                        "gte": from_ts.format(&Rfc3339)?,
                        "lte": to_ts.format(&Rfc3339)?,
                    } } },
                ]
            }
        },
        "aggs": {
            "total_cost": { "sum": { "field": "metrics.cost_usd" } },
            "avg_latency": { "avg": { "field": "metrics.latency_ms" } },
            "success_count": {
                "filter": { "range": { "response.status_code": { "lt": 400 } } }
            },
        },
        "size": 0,
    }))
}

fn index_mapping() -> JsonValue {
    json!({
        "mappings": {
            "properties": {
                "trace_id": { "type": "keyword" },
                "timestamp": { "type": "date" },
                "virtual_key_name": { "type": "keyword" },
                "virtual_key_id": { "type": "keyword" },
                "user_id": { "type": "keyword" },
                "request": {
                    "properties": {
                        "model": { "type": "keyword" },
                        "provider": { "type": "keyword" },
                        "messages": { "type": "keyword" },
                        "prompt": { "type": "text" },
                        "temperature": { "type": "float" },
                        "max_tokens": { "type": "integer" },
                    }
                },
                "response": {
                    "properties": {
                        "content": { "type": "text" },
                        "status_code": { "type": "integer" },
                        "error": { "type": "text" },
                        "usage": {
                            "properties": {
                                "prompt_tokens": { "type": "integer" },
                                "completion_tokens": { "type": "integer" },
                                "total_tokens": { "type": "integer" },
                            }
                        },
                    }
                },
                "metrics": {
                    "properties": {
                        "latency_ms": { "type": "integer" },
                        "cost_usd": { "type": "float" },
                    }
                },
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id")]
    id: String,
    status: u16,
    #[serde(default)]
    error: Option<BulkItemError>,
}

#[derive(Debug, Deserialize)]
struct BulkItemError {
    #[serde(rename = "type")]
    kind: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DocResponse {
    #[serde(rename = "_source")]
    source: LogEntry,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    total: HitsTotal,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct HitsTotal {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: LogEntry,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    hits: StatsHits,
    aggregations: StatsAggregations,
}

#[derive(Debug, Deserialize)]
struct StatsHits {
    total: HitsTotal,
}

#[derive(Debug, Deserialize)]
struct StatsAggregations {
    total_cost: AggValue,
    avg_latency: AggValue,
    success_count: AggCount,
}

#[derive(Debug, Deserialize)]
struct AggValue {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AggCount {
    doc_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MetricsLog, RequestLog, ResponseLog, UsageLog};
    use time::macros::datetime;

    fn sample_entry(trace_id: Uuid) -> LogEntry {
        LogEntry {
            trace_id,
            timestamp: datetime!(2024-06-01 12:00:00 UTC),
            virtual_key_name: "ci".to_string(),
            virtual_key_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            request: RequestLog {
                model: "openai/gpt-4o".to_string(),
                provider: "openai".to_string(),
                messages: Some(serde_json::json!([{"role": "user", "content": "hi"}]).into()),
                ..Default::default()
            },
            response: ResponseLog {
                content: "hello".to_string(),
                usage: UsageLog {
                    prompt_tokens: 10,
                    completion_tokens: 20,
                    total_tokens: 30,
                },
                status_code: 200,
                error: None,
            },
            metrics: MetricsLog {
                latency_ms: 420,
                cost_usd: 0.000225,
            },
        }
    }

    #[test]
    fn bulk_body_alternates_action_and_document_lines() {
        let entries: Vec<LogEntry> = (0..3).map(|_| sample_entry(Uuid::new_v4())).collect();
        let body = bulk_body(&entries).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 6);
        for (idx, entry) in entries.iter().enumerate() {
            let action: JsonValue = serde_json::from_str(lines[idx * 2]).unwrap();
            assert_eq!(action["index"]["_index"], INDEX_NAME);
            assert_eq!(action["index"]["_id"], entry.trace_id.to_string());
            let doc: JsonValue = serde_json::from_str(lines[idx * 2 + 1]).unwrap();
            assert_eq!(doc["trace_id"], entry.trace_id.to_string());
            assert!(doc["request"]["messages"].is_string());
        }
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn bulk_body_reuses_the_trace_id_for_replays() {
        let entry = sample_entry(Uuid::new_v4());
        let body = bulk_body(&[entry.clone(), entry.clone()]).unwrap();
        let ids: Vec<String> = body
            .lines()
            .step_by(2)
            .map(|line| {
                let action: JsonValue = serde_json::from_str(line).unwrap();
                action["index"]["_id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn search_body_includes_every_requested_filter() {
        let params = SearchParams {
            query: Some("refund".to_string()),
            model: Some("openai/gpt-4o".to_string()),
            status: Some(200),
            from_ts: Some(datetime!(2024-06-01 00:00:00 UTC)),
            to_ts: Some(datetime!(2024-06-02 00:00:00 UTC)),
            offset: 40,
            size: 20,
        };
        let body = search_body(&params).unwrap();
        let must = body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 4);
        assert_eq!(must[0]["multi_match"]["query"], "refund");
        assert_eq!(must[1]["term"]["request.model"], "openai/gpt-4o");
        assert_eq!(must[2]["term"]["response.status_code"], 200);
        assert_eq!(
            must[3]["range"]["timestamp"]["gte"],
            "2024-06-01T00:00:00Z"
        );
        assert_eq!(body["sort"][0]["timestamp"]["order"], "desc");
        assert_eq!(body["from"], 40);
        assert_eq!(body["size"], 20);
    }

    #[test]
    fn empty_filters_build_a_match_all_bool() {
        let body = search_body(&SearchParams {
            size: 20,
            ..Default::default()
        })
        .unwrap();
        assert!(body["query"]["bool"]["must"].as_array().unwrap().is_empty());
    }

    #[test]
    fn stats_body_aggregates_without_hits() {
        let body = stats_body(
            Uuid::new_v4(),
            datetime!(2024-05-01 00:00:00 UTC),
            datetime!(2024-06-01 00:00:00 UTC),
        )
        .unwrap();
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["total_cost"]["sum"]["field"], "metrics.cost_usd");
        assert_eq!(body["aggs"]["avg_latency"]["avg"]["field"], "metrics.latency_ms");
        assert_eq!(
            body["aggs"]["success_count"]["filter"]["range"]["response.status_code"]["lt"],
            400
        );
    }

    #[test]
    fn mapping_types_the_hot_fields() {
        let mapping = index_mapping();
        let props = &mapping["mappings"]["properties"];
        assert_eq!(props["trace_id"]["type"], "keyword");
        assert_eq!(props["timestamp"]["type"], "date");
        assert_eq!(props["request"]["properties"]["model"]["type"], "keyword");
        assert_eq!(props["request"]["properties"]["provider"]["type"], "keyword");
        assert_eq!(props["response"]["properties"]["content"]["type"], "text");
    }
}
