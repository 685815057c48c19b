//! Signed session tokens
//!
//! Two signing domains share one mechanism. Self-issued tokens carry the
//! session parameters through the browser, signed and verified with the
//! bridge's own key pair. External tokens carry the IRMA session result,
//! verified with the IRMA server's public key. Neither kind carries an
//! expiry claim; request staleness is enforced against the original
//! AuthnRequest's IssueInstant instead.

use crate::error::{BridgeError, BridgeResult};
use crate::models::AssertParameters;
use crate::saml::Condiscon;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{json, Value};

/// Subject of self-issued session-parameter tokens
const SUBJECT_ASSERT_PARAMETERS: &str = "assert_parameters";

/// Subject of self-issued disclosure-request tokens
const SUBJECT_VERIFICATION_REQUEST: &str = "verification_request";

/// Claim name holding the session parameters
const CLAIM_ASSERT_PARAMETERS: &str = "aparams";

/// Claim name holding the disclosure request
const CLAIM_DISCLOSURE_REQUEST: &str = "sprequest";

/// Seconds an IRMA session result stays valid
const DISCLOSURE_RESULT_VALIDITY_SECS: u32 = 30;

#[derive(Serialize)]
struct SelfIssuedClaims<'a> {
    iss: &'a str,
    iat: i64,
    sub: &'a str,
    #[serde(flatten)]
    payload: Value,
}

/// Encoder/decoder for both token domains.
pub struct SessionTokenCodec {
    issuer: String,
}

impl SessionTokenCodec {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Sign session parameters into a compact token.
    pub fn encode_session(
        &self,
        key: &EncodingKey,
        parameters: &AssertParameters,
    ) -> BridgeResult<String> {
        self.encode(
            key,
            SUBJECT_ASSERT_PARAMETERS,
            json!({ CLAIM_ASSERT_PARAMETERS: parameters }),
        )
    }

    /// Sign a disclosure request for the IRMA server.
    pub fn encode_disclosure_request(
        &self,
        key: &EncodingKey,
        condiscon: &Condiscon,
    ) -> BridgeResult<String> {
        let request = json!({
            "request": {
                "@context": "https://irma.app/ld/request/disclosure/v2",
                "disclose": condiscon,
            },
            "validity": DISCLOSURE_RESULT_VALIDITY_SECS,
        });
        self.encode(
            key,
            SUBJECT_VERIFICATION_REQUEST,
            json!({ CLAIM_DISCLOSURE_REQUEST: request }),
        )
    }

    fn encode(&self, key: &EncodingKey, subject: &str, payload: Value) -> BridgeResult<String> {
        let claims = SelfIssuedClaims {
            iss: &self.issuer,
            iat: Utc::now().timestamp(),
            sub: subject,
            payload,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| BridgeError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify a self-issued token and return its session parameters.
    pub fn decode_session(
        &self,
        key: &DecodingKey,
        token: &str,
    ) -> BridgeResult<AssertParameters> {
        let claims = decode_claims(key, token)?;
        let payload = claims
            .get(CLAIM_ASSERT_PARAMETERS)
            .cloned()
            .ok_or_else(|| {
                BridgeError::MalformedToken(format!("missing {CLAIM_ASSERT_PARAMETERS} claim"))
            })?;
        serde_json::from_value(payload)
            .map_err(|e| BridgeError::MalformedToken(format!("bad session parameters: {e}")))
    }

    /// Verify an IRMA session-result token and return its claims.
    pub fn decode_disclosure_result(&self, key: &DecodingKey, token: &str) -> BridgeResult<Value> {
        decode_claims(key, token)
    }
}

/// Verify a token's signature and return the raw claims.
///
/// Session tokens carry no exp claim, so expiry validation stays off and
/// no claims are required up front; claim shape is the caller's problem.
fn decode_claims(key: &DecodingKey, token: &str) -> BridgeResult<Value> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Value>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| BridgeError::Signature(format!("token verification failed: {e}")))
}
