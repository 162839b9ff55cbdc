//! Unified client error model.
//! Every fallible operation of the session core returns `AppResult`. The enum is `Clone`
//! so that a single refresh outcome can be handed to every caller waiting on it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Unauthorized { code: String, message: String },
    RefreshFailed { code: String, message: String },
    Http { status: u16, code: String, message: String },
    Transport { code: String, message: String },
    Decode { code: String, message: String },
    Config { code: String, message: String },
    Internal { code: String, message: String },
}

/// Error body shape returned by the backend: `{"error": "<code>", "message": "<text>"}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Unauthorized { code, .. }
            | AppError::RefreshFailed { code, .. }
            | AppError::Http { code, .. }
            | AppError::Transport { code, .. }
            | AppError::Decode { code, .. }
            | AppError::Config { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized { message, .. }
            | AppError::RefreshFailed { message, .. }
            | AppError::Http { message, .. }
            | AppError::Transport { message, .. }
            | AppError::Decode { message, .. }
            | AppError::Config { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn unauthorized<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn refresh_failed<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::RefreshFailed { code: code.into(), message: msg.into() } }
    pub fn http<C: Into<String>, M: Into<String>>(status: u16, code: C, msg: M) -> Self { AppError::Http { status, code: code.into(), message: msg.into() } }
    pub fn transport<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Transport { code: code.into(), message: msg.into() } }
    pub fn decode<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Decode { code: code.into(), message: msg.into() } }
    pub fn config<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Status the error corresponds to on the wire. Local failures map onto the
    /// nearest gateway-style status so callers can branch on one number.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthorized { .. } => 401,
            AppError::RefreshFailed { .. } => 401,
            AppError::Http { status, .. } => *status,
            AppError::Transport { .. } => 503,
            AppError::Decode { .. } => 502,
            AppError::Config { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Unauthorized { .. })
    }

    /// Build an error from a non-success status and the raw response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let code = parsed.error.unwrap_or_else(|| format!("http_{}", status));
        let message = parsed.message.unwrap_or_else(|| {
            if body.trim().is_empty() { format!("HTTP {}", status) } else { body.trim().to_string() }
        });
        if status == 401 {
            AppError::Unauthorized { code, message }
        } else {
            AppError::Http { status, code, message }
        }
    }

    /// Consume an error response. Reading the body is best-effort.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Self::from_status(status, &body)
    }

    /// Reclassify an error raised while talking to the refresh endpoint.
    pub fn into_refresh_failure(self) -> Self {
        match self {
            AppError::RefreshFailed { .. } => self,
            other => AppError::RefreshFailed { code: other.code_str().to_string(), message: other.message().to_string() },
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Http { status, code, message } => write!(f, "{} ({}): {}", code, status, message),
            _ => write!(f, "{}: {}", self.code_str(), self.message()),
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Decode { code: "decode_error".into(), message: err.to_string() };
        }
        if err.is_builder() {
            return AppError::Config { code: "request_builder".into(), message: err.to_string() };
        }
        if let Some(status) = err.status() {
            return AppError::from_status(status.as_u16(), &err.to_string());
        }
        let code = if err.is_timeout() { "timeout" } else if err.is_connect() { "connect_error" } else { "transport_error" };
        AppError::Transport { code: code.into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode { code: "decode_error".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}
