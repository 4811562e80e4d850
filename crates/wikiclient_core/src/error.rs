use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the wiki client.
///
/// `Transport` and `HttpStatus` are the only kinds the request executor
/// retries. `Api` is a well-formed response carrying a semantic rejection and
/// is surfaced on the first attempt.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP {status} {status_text}")]
    HttpStatus { status: u16, status_text: String },

    #[error("{code}: {info}")]
    Api { code: String, info: String },

    #[error("Failed to fetch token: response has no `{token_type}token` entry")]
    TokenResolution { token_type: String },

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    NotFound(String),

    #[error("unexpected API response: {0}")]
    UnexpectedResponse(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl WikiError {
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HttpStatus { .. })
    }

    /// API error code, when the wiki rejected the call.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WikiError>;
