use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::StreamExt;
use http::header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use serde_json::{Map as JsonMap, Value as JsonValue};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use lumina_keys::{KeyConfig, ProviderKind};
use lumina_logs::{LogEntry, LogMessages, MetricsLog, RequestLog, ResponseLog, UsageLog};

use crate::core::ProxyState;
use crate::error::ProxyError;
use crate::pricing;
use crate::provider::{split_model, Provider};
use crate::usage::{extract_content, extract_usage};

pub async fn chat_completions(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_request(state, "/v1/chat/completions", None, headers, body).await
}

pub async fn completions(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_request(state, "/v1/completions", None, headers, body).await
}

pub async fn embeddings(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy_request(state, "/v1/embeddings", None, headers, body).await
}

pub async fn anthropic_messages(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let forced = Provider::new(ProviderKind::Anthropic);
    proxy_request(state, "/v1/messages", Some(forced), headers, body).await
}

async fn proxy_request(
    state: Arc<ProxyState>,
    upstream_path: &'static str,
    forced_provider: Option<Provider>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = Uuid::new_v4();
    let started = Instant::now();
    match dispatch(
        &state,
        upstream_path,
        forced_provider,
        &headers,
        body,
        trace_id,
        started,
    )
    .await
    {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &Arc<ProxyState>,
    upstream_path: &'static str,
    forced_provider: Option<Provider>,
    headers: &HeaderMap,
    body: Bytes,
    trace_id: Uuid,
    started: Instant,
) -> Result<Response, ProxyError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ProxyError::unauthorized("missing or invalid authorization header"))?;
    let config = state.keys.validate_key(token).await?;

    let mut payload: JsonMap<String, JsonValue> = serde_json::from_slice(&body)
        .map_err(|_| ProxyError::malformed("invalid JSON body"))?;

    let full_model = payload
        .get("model")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ProxyError::malformed("missing 'model' field"))?
        .to_string();
    let (provider_name, model) = split_model(&full_model).ok_or_else(|| {
        ProxyError::malformed(format!(
            "invalid model format: expected 'provider/model', got '{full_model}'"
        ))
    })?;
    let provider = match forced_provider {
        Some(provider) => provider,
        None => Provider::parse(provider_name).ok_or_else(|| {
            ProxyError::malformed(format!("unsupported provider: {provider_name}"))
        })?,
    };
    let model = model.to_string();

    if !config.is_model_allowed(&full_model) {
        return Err(ProxyError::model_not_allowed(&full_model));
    }
    config.check_budget(0.0)?;
    let secret = config
        .provider_key(provider.kind())
        .map_err(|_| ProxyError::provider_not_configured(provider.as_str()))?
        .to_string();

    // Upstreams see the bare model name; the provider prefix is ours.
    payload.insert("model".to_string(), JsonValue::String(model.clone()));
    let is_stream = payload
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let request_log = RequestLog {
        model: full_model,
        provider: provider.as_str().to_string(),
        messages: payload.get("messages").cloned().map(LogMessages::from),
        prompt: payload
            .get("prompt")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        temperature: payload.get("temperature").and_then(JsonValue::as_f64),
        max_tokens: payload.get("max_tokens").and_then(JsonValue::as_i64),
    };

    let outbound = serde_json::to_vec(&payload)
        .map_err(|_| ProxyError::internal("failed to rewrite request"))?;
    let url = format!(
        "{}{}",
        provider.base_url(),
        provider.upstream_path(upstream_path)
    );
    let upstream = provider
        .apply_headers(state.http.post(&url), &secret)
        .header(CONTENT_TYPE, "application/json")
        .body(outbound)
        .send()
        .await
        .map_err(|err| {
            warn!(%trace_id, error = %err, "upstream dispatch failed");
            ProxyError::upstream_unreachable()
        })?;

    if is_stream {
        Ok(stream_response(
            state,
            upstream,
            trace_id,
            &config,
            request_log,
            started,
        ))
    } else {
        buffered_response(
            state,
            upstream,
            trace_id,
            &config,
            request_log,
            &model,
            provider,
            started,
        )
        .await
    }
}

#[allow(clippy::too_many_arguments)]
async fn buffered_response(
    state: &Arc<ProxyState>,
    upstream: reqwest::Response,
    trace_id: Uuid,
    config: &KeyConfig,
    request_log: RequestLog,
    model: &str,
    provider: Provider,
    started: Instant,
) -> Result<Response, ProxyError> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|err| {
        warn!(%trace_id, error = %err, "failed to read upstream response");
        ProxyError::upstream_unreachable()
    })?;
    let latency_ms = started.elapsed().as_millis() as i64;

    let parsed: JsonValue = serde_json::from_slice(&body).unwrap_or(JsonValue::Null);
    let usage = extract_usage(&parsed);
    let content = extract_content(&parsed);
    let cost = pricing::cost_usd(provider.as_str(), model, usage);

    // Detached: client disconnects must not truncate spend accounting.
    let keys = state.keys.clone();
    let key_id = config.key_id;
    tokio::spawn(async move {
        keys.update_spend(key_id, cost, usage.total_tokens).await;
    });

    state.logs.submit(LogEntry {
        trace_id,
        timestamp: OffsetDateTime::now_utc(),
        virtual_key_name: config.name.clone(),
        virtual_key_id: config.key_id,
        user_id: config.user_id,
        request: request_log,
        response: ResponseLog {
            content,
            usage,
            status_code: status.as_u16(),
            error: None,
        },
        metrics: MetricsLog {
            latency_ms,
            cost_usd: cost,
        },
    });

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().extend(upstream_headers);
    Ok(response)
}

/// Byte passthrough for `stream: true`. The upstream body is teed into a
/// channel whose closure marks end-of-stream, at which point the trace is
/// submitted with zero usage and zero cost.
fn stream_response(
    state: &Arc<ProxyState>,
    upstream: reqwest::Response,
    trace_id: Uuid,
    config: &KeyConfig,
    request_log: RequestLog,
    started: Instant,
) -> Response {
    let status = upstream.status();

    let (tx, mut rx) = mpsc::channel::<Bytes>(256);
    let logs = state.logs.clone();
    let virtual_key_name = config.name.clone();
    let virtual_key_id = config.key_id;
    let user_id = config.user_id;
    tokio::spawn(async move {
        while rx.recv().await.is_some() {}
        let latency_ms = started.elapsed().as_millis() as i64;
        logs.submit(LogEntry {
            trace_id,
            timestamp: OffsetDateTime::now_utc(),
            virtual_key_name,
            virtual_key_id,
            user_id,
            request: request_log,
            response: ResponseLog {
                content: "[streaming response]".to_string(),
                usage: UsageLog::default(),
                status_code: status.as_u16(),
                error: None,
            },
            metrics: MetricsLog {
                latency_ms,
                cost_usd: 0.0,
            },
        });
    });

    let stream = unfold((upstream.bytes_stream(), tx), |(mut upstream, tx)| async move {
        match upstream.next().await {
            Some(Ok(bytes)) => {
                let _ = tx.send(bytes.clone()).await;
                Some((Ok(bytes), (upstream, tx)))
            }
            Some(Err(err)) => Some((
                Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
                (upstream, tx),
            )),
            None => None,
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
