//! Bridge-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors produced by the protocol/security core.
///
/// Every variant is terminal: each failing request yields exactly one
/// plain-text response with the mapped status code, and nothing in the
/// core retries.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed or unsupported HTTP-Redirect binding encoding
    #[error("{0}")]
    Decoding(String),

    /// A signature was present but no trusted credential validates it
    #[error("{0}")]
    Signature(String),

    /// No signature verification actually took place for this message
    #[error("Message not authenticated")]
    Unauthenticated,

    /// Invalid or ambiguous attribute policy in the request
    #[error("{0}")]
    Configuration(String),

    /// The AuthnRequest's IssueInstant is older than the configured TTL
    #[error("SAML request is too old, session timeout")]
    ExpiredRequest,

    /// The disclosure-session-start call failed
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Proof not valid or the disclosed attributes do not fulfil the policy
    #[error("{0}")]
    PolicyViolation(String),

    /// A disclosure record has a missing or unexpected shape
    #[error("Received malformed disclosure")]
    MalformedDisclosure,

    /// A JWT verified correctly but its claims have the wrong shape
    #[error("Malformed token claims: {0}")]
    MalformedToken(String),

    /// Signing, marshalling, or self-verification failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// HTTP status code this error terminates the request with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Decoding(_)
            | BridgeError::Configuration(_)
            | BridgeError::ExpiredRequest
            | BridgeError::MalformedDisclosure
            | BridgeError::MalformedToken(_) => StatusCode::BAD_REQUEST,
            BridgeError::Signature(_)
            | BridgeError::Unauthenticated
            | BridgeError::PolicyViolation(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal detail goes to the log, never to the peer.
        let message = match &self {
            BridgeError::Internal(detail) => {
                tracing::error!(detail = %detail, "bridge internal error");
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}
