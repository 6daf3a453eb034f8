#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, Clone)]
pub enum ProxyError {
    BadRequest(String),
    Upstream(String),
    Internal(String),
    Serialization(String),
    ServiceUnavailable(String),
    Cancelled(String),
}

#[cfg(feature = "server")]
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ProxyError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ProxyError::Upstream(msg) => (StatusCode::BAD_GATEWAY, format!("Upstream error: {}", msg)),
            ProxyError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {}", msg)),
            ProxyError::Serialization(msg) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Serialization error: {}", msg)),
            ProxyError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ProxyError::Cancelled(msg) => (StatusCode::REQUEST_TIMEOUT, format!("Request cancelled: {}", msg)),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": "proxy_error",
                "code": null
            }
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ProxyError::Upstream(msg) => write!(f, "Upstream Error: {}", msg),
            ProxyError::Internal(msg) => write!(f, "Internal Error: {}", msg),
            ProxyError::Serialization(msg) => write!(f, "Serialization Error: {}", msg),
            ProxyError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            ProxyError::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

/// # From Trait Implementations for Better Error Handling
///
/// These implementations allow automatic conversion from common error types
/// to ProxyError, so `?` composes across handlers and background tasks.
impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Upstream("Request timeout - backend did not respond in time".to_string())
        } else if err.is_connect() {
            ProxyError::Upstream("Connection failed - unable to reach backend".to_string())
        } else if err.is_request() {
            ProxyError::BadRequest(format!("Invalid request: {}", err))
        } else if err.status().is_some() {
            let status = err.status().unwrap();
            ProxyError::Upstream(format!("HTTP {}: {}", status.as_u16(), err))
        } else {
            ProxyError::Upstream(format!("HTTP client error: {}", err))
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Serialization(format!("JSON error: {}", err))
    }
}

#[cfg(feature = "server")]
impl From<axum::http::Error> for ProxyError {
    fn from(err: axum::http::Error) -> Self {
        ProxyError::Internal(format!("HTTP protocol error: {}", err))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                ProxyError::BadRequest("Resource not found".to_string())
            }
            std::io::ErrorKind::PermissionDenied => {
                ProxyError::BadRequest("Permission denied".to_string())
            }
            std::io::ErrorKind::TimedOut => {
                ProxyError::Upstream("I/O operation timed out".to_string())
            }
            _ => ProxyError::Internal(format!("I/O error: {}", err))
        }
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::BadRequest(format!("Invalid URL: {}", err))
    }
}
