use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KeyError;
use crate::pattern;

/// Upstream LLM vendors Lumina can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalised hot-path projection of a virtual key, cached under its
/// token hash. Carries decrypted provider secrets; lives only in cache and
/// process memory, never in durable storage or logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub allowed_models: Vec<String>,
    /// provider kind -> plaintext upstream API secret
    pub providers: HashMap<String, String>,
    pub budget_limit: Option<f64>,
    pub current_spend: f64,
}

impl KeyConfig {
    /// The plaintext upstream secret for `provider`, if configured.
    pub fn provider_key(&self, provider: ProviderKind) -> Result<&str, KeyError> {
        self.providers
            .get(provider.as_str())
            .map(String::as_str)
            .ok_or(KeyError::ProviderNotConfigured)
    }

    /// True iff the key's patterns admit the full `provider/model` string.
    pub fn is_model_allowed(&self, model: &str) -> bool {
        pattern::is_model_allowed(&self.allowed_models, model)
    }

    /// Reject when a cap is set and already consumed. The estimated cost on
    /// the admission path is zero (true cost is known only post-response),
    /// so this is effectively a threshold on existing spend.
    pub fn check_budget(&self, estimated_cost: f64) -> Result<(), KeyError> {
        if let Some(limit) = self.budget_limit {
            if self.current_spend + estimated_cost > limit {
                return Err(KeyError::BudgetExceeded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allowed: &[&str], budget: Option<f64>, spend: f64) -> KeyConfig {
        KeyConfig {
            key_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "test".to_string(),
            allowed_models: allowed.iter().map(|s| s.to_string()).collect(),
            providers: HashMap::from([("openai".to_string(), "sk-real".to_string())]),
            budget_limit: budget,
            current_spend: spend,
        }
    }

    #[test]
    fn provider_kind_parses_the_closed_set() {
        assert_eq!("openai".parse(), Ok(ProviderKind::OpenAI));
        assert_eq!("anthropic".parse(), Ok(ProviderKind::Anthropic));
        assert!("gemini".parse::<ProviderKind>().is_err());
        assert!("OpenAI".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn provider_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::Anthropic).unwrap(),
            "\"anthropic\""
        );
    }

    #[test]
    fn provider_key_returns_configured_secret() {
        let cfg = config(&[], None, 0.0);
        assert_eq!(cfg.provider_key(ProviderKind::OpenAI).unwrap(), "sk-real");
        assert!(matches!(
            cfg.provider_key(ProviderKind::Anthropic),
            Err(KeyError::ProviderNotConfigured)
        ));
    }

    #[test]
    fn model_patterns_gate_the_full_model_string() {
        let cfg = config(&["openai/*"], None, 0.0);
        assert!(cfg.is_model_allowed("openai/gpt-4o"));
        assert!(!cfg.is_model_allowed("anthropic/claude-3-haiku-20240307"));
    }

    #[test]
    fn budget_without_cap_never_rejects() {
        let cfg = config(&[], None, 1_000_000.0);
        assert!(cfg.check_budget(0.0).is_ok());
    }

    #[test]
    fn zero_cap_rejects_once_spend_is_nonzero() {
        // The admission estimate is zero, so the very first request passes;
        // any recorded spend then trips the cap.
        let fresh = config(&[], Some(0.0), 0.0);
        assert!(fresh.check_budget(0.0).is_ok());

        let spent = config(&[], Some(0.0), 0.0001);
        assert!(matches!(
            spent.check_budget(0.0),
            Err(KeyError::BudgetExceeded)
        ));
    }

    #[test]
    fn cap_compares_spend_plus_estimate() {
        let cfg = config(&[], Some(1.0), 0.8);
        assert!(cfg.check_budget(0.2).is_ok());
        assert!(cfg.check_budget(0.3).is_err());
    }
}
