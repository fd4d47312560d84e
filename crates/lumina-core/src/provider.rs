use lumina_keys::ProviderKind;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upstream routing for one provider: base URL, path shape, and credential
/// header shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provider {
    kind: ProviderKind,
}

impl Provider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }

    pub fn parse(name: &str) -> Option<Self> {
        name.parse::<ProviderKind>().ok().map(Self::new)
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn as_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn base_url(&self) -> &'static str {
        match self.kind {
            ProviderKind::OpenAI => OPENAI_BASE_URL,
            ProviderKind::Anthropic => ANTHROPIC_BASE_URL,
        }
    }

    /// The upstream path for an inbound route path. Anthropic has a single
    /// messages endpoint regardless of the inbound shape.
    pub fn upstream_path<'a>(&self, route_path: &'a str) -> &'a str {
        match self.kind {
            ProviderKind::OpenAI => route_path,
            ProviderKind::Anthropic => "/v1/messages",
        }
    }

    /// Attach the provider's credential headers to an upstream request.
    pub fn apply_headers(
        &self,
        request: reqwest::RequestBuilder,
        secret: &str,
    ) -> reqwest::RequestBuilder {
        match self.kind {
            ProviderKind::OpenAI => request.bearer_auth(secret),
            ProviderKind::Anthropic => request
                .header("x-api-key", secret)
                .header("anthropic-version", ANTHROPIC_VERSION),
        }
    }
}

/// Split a `provider/model` string at the first slash.
pub fn split_model(full_model: &str) -> Option<(&str, &str)> {
    full_model.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_at_the_first_slash_only() {
        assert_eq!(split_model("openai/gpt-4o"), Some(("openai", "gpt-4o")));
        assert_eq!(
            split_model("anthropic/claude-3/custom"),
            Some(("anthropic", "claude-3/custom"))
        );
        assert_eq!(split_model("gpt-4o"), None);
    }

    #[test]
    fn provider_parsing_rejects_unknown_prefixes() {
        assert!(Provider::parse("openai").is_some());
        assert!(Provider::parse("anthropic").is_some());
        assert!(Provider::parse("gemini").is_none());
        assert!(Provider::parse("").is_none());
    }

    #[test]
    fn anthropic_always_routes_to_messages() {
        let anthropic = Provider::new(lumina_keys::ProviderKind::Anthropic);
        assert_eq!(anthropic.upstream_path("/v1/chat/completions"), "/v1/messages");
        assert_eq!(anthropic.upstream_path("/v1/messages"), "/v1/messages");

        let openai = Provider::new(lumina_keys::ProviderKind::OpenAI);
        assert_eq!(
            openai.upstream_path("/v1/chat/completions"),
            "/v1/chat/completions"
        );
        assert_eq!(openai.upstream_path("/v1/embeddings"), "/v1/embeddings");
    }
}
