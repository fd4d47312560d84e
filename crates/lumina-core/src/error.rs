use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use lumina_keys::KeyError;
use serde_json::json;

/// Categorised proxy errors, mapped one-to-one onto client status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    ProviderNotConfigured,
    Unauthorized,
    ModelNotAllowed,
    BudgetExceeded,
    Internal,
    UpstreamUnreachable,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::MalformedRequest | ErrorKind::ProviderNotConfigured => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::ModelNotAllowed | ErrorKind::BudgetExceeded => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn model_not_allowed(model: &str) -> Self {
        Self::new(
            ErrorKind::ModelNotAllowed,
            format!("model '{model}' is not allowed for this key"),
        )
    }

    pub fn provider_not_configured(provider: &str) -> Self {
        Self::new(
            ErrorKind::ProviderNotConfigured,
            format!("provider '{provider}' is not configured for this key"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn upstream_unreachable() -> Self {
        Self::new(ErrorKind::UpstreamUnreachable, "failed to reach upstream")
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        let mut response = Response::new(Body::from(payload.to_string()));
        *response.status_mut() = self.kind.status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl From<KeyError> for ProxyError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidKey | KeyError::KeyRevoked | KeyError::Unauthorized => {
                ProxyError::unauthorized(err.to_string())
            }
            KeyError::BudgetExceeded => ProxyError::new(ErrorKind::BudgetExceeded, err.to_string()),
            KeyError::ProviderNotConfigured => {
                ProxyError::new(ErrorKind::ProviderNotConfigured, err.to_string())
            }
            KeyError::NotFound => ProxyError::unauthorized("invalid virtual key"),
            // Raw adapter errors never reach clients.
            KeyError::Decryption(_) | KeyError::Crypto(_) => {
                ProxyError::internal("credential decryption failed")
            }
            KeyError::Storage(_) | KeyError::Cache(_) => ProxyError::internal("internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_the_documented_statuses() {
        assert_eq!(ErrorKind::MalformedRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorKind::ProviderNotConfigured.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::ModelNotAllowed.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::BudgetExceeded.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorKind::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::UpstreamUnreachable.status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn key_errors_translate_by_category_not_by_message() {
        let unauthorized = ProxyError::from(KeyError::InvalidKey);
        assert_eq!(unauthorized.kind, ErrorKind::Unauthorized);

        let revoked = ProxyError::from(KeyError::KeyRevoked);
        assert_eq!(revoked.kind, ErrorKind::Unauthorized);

        let budget = ProxyError::from(KeyError::BudgetExceeded);
        assert_eq!(budget.kind, ErrorKind::BudgetExceeded);

        let missing = ProxyError::from(KeyError::ProviderNotConfigured);
        assert_eq!(missing.kind, ErrorKind::ProviderNotConfigured);
    }

    #[test]
    fn decryption_failures_are_internal_and_opaque() {
        let err = ProxyError::from(KeyError::Decryption(
            lumina_crypto::CryptoError::DecryptionFailed,
        ));
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "credential decryption failed");
    }
}
