//! Error types for the proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::openai_types::{ChatErrorResponse, ValidationFailed};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// The inbound body did not deserialize into a request type.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Request content that has no native counterpart.
    #[error("Unsupported input: {message}")]
    UnsupportedInput { message: String },

    #[error("Unable to access the image URL: {message}")]
    ImageFetch { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            message: msg.into(),
        }
    }

    pub fn image_fetch(msg: impl Into<String>) -> Self {
        Self::ImageFetch {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::OK,
            Self::UnsupportedInput { .. } | Self::ImageFetch { .. } => StatusCode::BAD_REQUEST,
            Self::Provider { .. } => StatusCode::BAD_GATEWAY,
            Self::Config { .. } | Self::Json(_) | Self::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnsupportedInput { .. } | Self::ImageFetch { .. } => {
                "invalid_request_error"
            }
            _ => "api_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        // Validation failures are answered with a 200 and a bare message body.
        if let Self::Validation { ref message } = self {
            tracing::warn!(error = %message, "request validation failed");
            return (StatusCode::OK, Json(ValidationFailed::default())).into_response();
        }

        tracing::error!(error = %self, "request failed");
        let body = ChatErrorResponse::new(self.error_type(), self.to_string());
        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
