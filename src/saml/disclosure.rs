//! IRMA disclosure results and policy fulfillment
//!
//! The IRMA server's session result carries the disclosed attributes as a
//! list of groups, each group a list of attribute records. See
//! <https://irma.app/docs/api-irma-server/#get-session-token-result>.

use crate::error::{BridgeError, BridgeResult};
use crate::saml::condiscon::Condiscon;
use serde_json::Value;
use std::collections::BTreeMap;

/// Proof status the IRMA server reports for an acceptable session.
pub const PROOF_STATUS_VALID: &str = "VALID";

/// A disclosure result distilled from an IRMA session-result JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
    /// Accepted attribute identifier to raw value pairs
    pub attributes: BTreeMap<String, String>,
    /// Proof status of the session, e.g. VALID or INVALID
    pub proof_status: Option<String>,
    /// IRMA session token, reused to derive deterministic assertion IDs
    pub token: Option<String>,
}

impl Disclosure {
    /// Build a disclosure from the claims of a verified session-result JWT.
    ///
    /// A group only contributes its id/rawvalue pairs when every record in
    /// it has status PRESENT. Groups with an absent or non-PRESENT status
    /// are skipped whole. Records that are not objects, or whose fields
    /// have the wrong type, fail the entire result.
    pub fn from_claims(claims: &Value) -> BridgeResult<Self> {
        let disclosed = claims
            .get("disclosed")
            .and_then(Value::as_array)
            .ok_or(BridgeError::MalformedDisclosure)?;

        let mut attributes = BTreeMap::new();
        for group in disclosed {
            let records = group.as_array().ok_or(BridgeError::MalformedDisclosure)?;

            let mut all_present = true;
            let mut group_attributes = BTreeMap::new();
            for record in records {
                let record = record.as_object().ok_or(BridgeError::MalformedDisclosure)?;

                let status = match record.get("status") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.as_str()),
                    Some(_) => return Err(BridgeError::MalformedDisclosure),
                };
                // Optional attributes (absent status) make the whole group
                // unsatisfied.
                if status != Some("PRESENT") {
                    all_present = false;
                    break;
                }

                let id = record
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or(BridgeError::MalformedDisclosure)?;
                let raw_value = record
                    .get("rawvalue")
                    .and_then(Value::as_str)
                    .ok_or(BridgeError::MalformedDisclosure)?;
                group_attributes.insert(id.to_string(), raw_value.to_string());
            }

            if all_present {
                attributes.append(&mut group_attributes);
            }
        }

        Ok(Disclosure {
            attributes,
            proof_status: claims
                .get("proofStatus")
                .and_then(Value::as_str)
                .map(String::from),
            token: claims
                .get("token")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    /// Whether the accepted attributes satisfy a condiscon. Presence-only,
    /// values are never compared.
    #[must_use]
    pub fn fulfills_condiscon(&self, condiscon: &Condiscon) -> bool {
        let disclosed = self.attributes.keys().cloned().collect();
        condiscon.is_fulfilled_by(&disclosed)
    }

    /// Full acceptance check for the assert flow: attributes present,
    /// proof valid, and the policy fulfilled.
    pub fn accept(&self, condiscon: &Condiscon) -> BridgeResult<()> {
        if self.attributes.is_empty() || self.proof_status.as_deref() != Some(PROOF_STATUS_VALID) {
            return Err(BridgeError::PolicyViolation(
                "Expected valid proof and present attributes".to_string(),
            ));
        }
        if !self.fulfills_condiscon(condiscon) {
            return Err(BridgeError::PolicyViolation(
                "The disclosure does not match the requested condiscon".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_present_group_accepted() {
        let claims = json!({
            "disclosed": [[
                {"id": "a.b.c.d", "status": "PRESENT", "rawvalue": "v1"},
                {"id": "a.b.c.e", "status": "PRESENT", "rawvalue": "v2"}
            ]],
            "proofStatus": "VALID",
            "token": "tok123"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        assert_eq!(disclosure.attributes.len(), 2);
        assert_eq!(disclosure.attributes["a.b.c.d"], "v1");
        assert_eq!(disclosure.proof_status.as_deref(), Some("VALID"));
        assert_eq!(disclosure.token.as_deref(), Some("tok123"));
    }

    #[test]
    fn test_group_with_missing_record_discarded() {
        let claims = json!({
            "disclosed": [
                [
                    {"id": "a.b.c.d", "status": "PRESENT", "rawvalue": "v1"},
                    {"id": "a.b.c.e", "status": "MISSING"}
                ],
                [
                    {"id": "x.y.z.w", "status": "PRESENT", "rawvalue": "v3"}
                ]
            ],
            "proofStatus": "VALID"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        assert_eq!(disclosure.attributes.len(), 1);
        assert_eq!(disclosure.attributes["x.y.z.w"], "v3");
    }

    #[test]
    fn test_null_status_discards_group() {
        let claims = json!({
            "disclosed": [[
                {"id": "a.b.c.d", "status": null, "rawvalue": "v1"}
            ]],
            "proofStatus": "VALID"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        assert!(disclosure.attributes.is_empty());
    }

    #[test]
    fn test_missing_disclosed_claim_is_malformed() {
        let claims = json!({"proofStatus": "VALID"});
        let err = Disclosure::from_claims(&claims).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedDisclosure));
    }

    #[test]
    fn test_non_object_record_is_malformed() {
        let claims = json!({"disclosed": [["oops"]]});
        let err = Disclosure::from_claims(&claims).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedDisclosure));
    }

    #[test]
    fn test_present_record_without_rawvalue_is_malformed() {
        let claims = json!({
            "disclosed": [[{"id": "a.b.c.d", "status": "PRESENT"}]]
        });
        let err = Disclosure::from_claims(&claims).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedDisclosure));
    }

    #[test]
    fn test_accept_requires_valid_proof() {
        let condiscon = Condiscon(vec![vec![vec!["a.b.c.d".into()]]]);
        let claims = json!({
            "disclosed": [[{"id": "a.b.c.d", "status": "PRESENT", "rawvalue": "v"}]],
            "proofStatus": "INVALID"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        let err = disclosure.accept(&condiscon).unwrap_err();
        assert!(matches!(err, BridgeError::PolicyViolation(_)));
    }

    #[test]
    fn test_accept_requires_fulfillment() {
        let condiscon = Condiscon(vec![vec![vec!["e.f.g.h".into()]]]);
        let claims = json!({
            "disclosed": [[{"id": "a.b.c.d", "status": "PRESENT", "rawvalue": "v"}]],
            "proofStatus": "VALID"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        let err = disclosure.accept(&condiscon).unwrap_err();
        assert!(err.to_string().contains("condiscon"));
    }

    #[test]
    fn test_accept_success() {
        let condiscon = Condiscon(vec![vec![vec!["a.b.c.d".into()]]]);
        let claims = json!({
            "disclosed": [[{"id": "a.b.c.d", "status": "PRESENT", "rawvalue": "v"}]],
            "proofStatus": "VALID"
        });
        let disclosure = Disclosure::from_claims(&claims).unwrap();
        assert!(disclosure.accept(&condiscon).is_ok());
    }
}
