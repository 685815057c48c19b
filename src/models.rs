//! Wire models passed between this daemon and the browser frontend
//!
//! Session state is deferred to the browser: everything a later request
//! needs travels as a signed JWT through the frontend and comes back in
//! the assert call. Nothing is stored server-side.

use serde::{Deserialize, Serialize};

/// Everything the assert step needs to finish a SAML exchange.
///
/// Serialized under the `aparams` claim of a self-issued session token and
/// carried by the browser between the request and assert calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_name: Option<String>,
    /// ID attribute of the originating AuthnRequest, echoed as InResponseTo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Assertion consumer service URL the response is destined for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Issuer of the originating AuthnRequest, our response audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Attribute policy the disclosure must fulfil, JSON wire form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condiscon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<String>,
    /// Present when the request step already failed and the frontend is
    /// routed to the error-assert flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_error: Option<RequestError>,
}

/// A request-phase failure preserved for the error-assert flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    pub status_code: u16,
    pub message: String,
}

/// Instructs the frontend to deliver a SAML response to the service
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectInstruction {
    /// The signed SAML response, base64
    pub saml_response: String,
    /// Where the frontend posts the response
    pub service_url: String,
    /// Opaque service-provider state, echoed back 1:1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<String>,
}

/// Everything the frontend needs to run an IRMA disclosure session and
/// finish the SAML exchange afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPage {
    /// IRMA server base URL the browser talks to
    pub irma_server: String,
    pub language: String,
    /// Session pointer returned by the IRMA server, host already rewritten
    /// to the browser-facing one
    pub session_data: String,
    pub assert_url: String,
    pub error_assert_url: String,
    pub error_url: String,
    /// Session parameters as a self-issued JWT
    pub assert_parameters: String,
}

/// Body of the assert call: the session token minted at request time plus
/// the disclosure result from the IRMA server.
#[derive(Debug, Clone, Deserialize)]
pub struct AssertRequest {
    /// Session parameters as a self-issued JWT
    pub parameters: String,
    /// Disclosure result as a JWT signed by the IRMA server
    pub token: String,
}

/// Body of the error-assert call; carries the session token only.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorAssertRequest {
    pub parameters: String,
}

/// A client-side error reported by the frontend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientError {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub lineno: Option<u64>,
    #[serde(default)]
    pub colno: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}
