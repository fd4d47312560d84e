use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use lumina_keys::KeyService;
use lumina_logs::Pipeline;

use crate::handler::{anthropic_messages, chat_completions, completions, embeddings};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ProxyState {
    pub keys: Arc<KeyService>,
    pub logs: Arc<Pipeline>,
    pub http: reqwest::Client,
}

/// The proxy dispatcher: four routes sharing one pipeline, distinguished
/// only by upstream path.
pub struct ProxyCore {
    state: Arc<ProxyState>,
}

impl ProxyCore {
    pub fn new(keys: Arc<KeyService>, logs: Arc<Pipeline>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self {
            state: Arc::new(ProxyState { keys, logs, http }),
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/completions", post(completions))
            .route("/v1/embeddings", post(embeddings))
            .route("/anthropic/v1/messages", post(anthropic_messages))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<ProxyState> {
        self.state.clone()
    }
}
