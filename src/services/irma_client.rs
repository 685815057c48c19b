//! Session-start client for the IRMA server
//!
//! One synchronous, unretried POST per request flow. Failures are turned
//! into a terminal user-facing error straight away.

use crate::error::{BridgeError, BridgeResult};

/// Pooled HTTP client for the disclosure-session-start call.
pub struct IrmaClient {
    http: reqwest::Client,
}

impl IrmaClient {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Start a disclosure session; `host` already includes the per-SP
    /// postfix. Returns the IRMA server's response body verbatim.
    pub async fn start_session(&self, token: &str, host: &str) -> BridgeResult<String> {
        let response = self
            .http
            .post(format!("{host}/session"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(token.to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    action = "request-flow",
                    warning = %format!("Error during IRMA start session: {e}")
                );
                BridgeError::Upstream {
                    status: 500,
                    message: "Something went wrong when trying to connect with the IRMA server"
                        .to_string(),
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(|e| {
                tracing::error!(
                    action = "request-flow",
                    warning = %format!("Error reading IRMA start session response: {e}")
                );
                BridgeError::Upstream {
                    status: 500,
                    message: "Start session was not successful".to_string(),
                }
            });
        }

        let message = response.text().await.unwrap_or_default();
        tracing::error!(
            action = "request-flow",
            warning = %format!(
                "Error with http status {status} - during IRMA start session: {message}"
            )
        );
        Err(BridgeError::Upstream {
            status: status.as_u16(),
            message: if message.is_empty() {
                "Start session was not successful".to_string()
            } else {
                message
            },
        })
    }
}
