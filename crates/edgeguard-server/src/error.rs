//! Gateway error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use edgeguard_proxy::ProxyError;

/// Errors surfaced to clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Method not supported for this origin.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Challenge solution rejected.
    #[error("challenge verification failed")]
    VerificationFailed,

    /// Origin access failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl GatewayError {
    /// Returns the status code and machine-readable code.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            GatewayError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            GatewayError::VerificationFailed => (StatusCode::FORBIDDEN, "verification_failed"),
            GatewayError::Proxy(ProxyError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::Proxy(ProxyError::OriginUnreachable(_)) => {
                (StatusCode::BAD_GATEWAY, "origin_unreachable")
            }
            GatewayError::Proxy(ProxyError::ConfigNotReady) => {
                (StatusCode::SERVICE_UNAVAILABLE, "config_not_ready")
            }
            GatewayError::Proxy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "origin_error"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Message shown to clients. Server-side failures stay generic since
    /// their details name internal origins.
    pub fn client_message(&self) -> String {
        let (status, _) = self.status();
        if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("server error")
                .to_ascii_lowercase()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();

        let body = ErrorResponse {
            error: self.client_message(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type for gateway handlers.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_errors_map_to_statuses() {
        let cases = [
            (ProxyError::OriginUnreachable("refused".into()), StatusCode::BAD_GATEWAY),
            (ProxyError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ProxyError::ConfigNotReady, StatusCode::SERVICE_UNAVAILABLE),
            (ProxyError::Store("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(GatewayError::from(err).status().0, status);
        }
    }

    #[test]
    fn server_errors_hide_origin_details() {
        let err = GatewayError::from(ProxyError::OriginUnreachable(
            "error sending request for url (http://10.0.3.7:3000/api/tasks)".into(),
        ));
        assert_eq!(err.client_message(), "bad gateway");
        assert!(err.to_string().contains("10.0.3.7"));

        let err = GatewayError::Internal("invalid status 1000".into());
        assert_eq!(err.client_message(), "internal server error");
    }

    #[test]
    fn client_errors_keep_their_message() {
        assert_eq!(
            GatewayError::VerificationFailed.client_message(),
            "challenge verification failed"
        );
    }

    #[tokio::test]
    async fn bad_gateway_body_is_generic() {
        let response = GatewayError::from(ProxyError::OriginUnreachable(
            "http://10.0.3.7:3000 refused".into(),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "bad gateway");
        assert_eq!(json["code"], "origin_unreachable");
    }

    #[test]
    fn into_response_status() {
        let response = GatewayError::VerificationFailed.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
