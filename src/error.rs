//! Error taxonomy shared by the message builder, the relay cache and the HTTP layer.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// Errors raised while building messages or looking things up on the relay.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Secret key material could not be decoded.
    #[error("invalid secret key: {0}")]
    Key(String),

    /// Tag data could not be encoded into the canonical form.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The bot was asked to reply to one of its own messages.
    #[error("refusing to reply to own message")]
    SelfAddress,

    /// The relay has no matching list, profile or message.
    #[error("not found: {0}")]
    NotFound(String),

    /// The relay could not be reached or answered garbage.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// A third-party HTTP source (image list) failed or answered garbage.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Missing or mismatching bearer token.
    #[error("not authenticated")]
    Authentication,

    /// Inbound JSON did not have the expected shape.
    #[error("malformed request body: {0}")]
    Decode(String),

    /// Request did not arrive over HTTPS.
    #[error("please use a HTTPS connection")]
    InsecureTransport,

    /// Backing key/value store failure.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Authentication => (StatusCode::UNAUTHORIZED, "Not Authenticated".to_string()),
            Self::NotFound(what) => {
                tracing::debug!(%what, "not found");
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::Decode(msg) => (StatusCode::BAD_REQUEST, format!("Bad request: {msg}")),
            Self::SelfAddress => return (StatusCode::OK, String::new()).into_response(),
            Self::RelayUnavailable(msg) => {
                tracing::warn!(error = %msg, "relay unavailable");
                (StatusCode::BAD_GATEWAY, "Relay unavailable".to_string())
            }
            Self::Upstream(msg) => {
                tracing::warn!(error = %msg, "upstream fetch failed");
                (StatusCode::BAD_GATEWAY, "Upstream unavailable".to_string())
            }
            Self::Key(_) | Self::Encoding(_) | Self::InsecureTransport | Self::Store(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
            body,
        )
            .into_response()
    }
}
