//! Attribute-policy extraction from an `AuthnRequest`
//!
//! A service provider can request attributes three ways, in strict
//! precedence: individual identifiers through the `RequestedAttributes`
//! extension, a packed condiscon JSON blob in an extension attribute, or
//! (legacy) a condiscon smuggled through the `NameIDPolicy` format field.
//! When all are absent the configured default applies.

use crate::error::{BridgeError, BridgeResult};
use crate::saml::authn_request::AuthnRequest;
use crate::saml::condiscon::{credential_of, Condiscon, ATTRIBUTE_SEGMENTS};
use std::collections::{BTreeMap, BTreeSet};

/// Derive the condiscon a request asks for.
pub fn extract_condiscon(
    request: &AuthnRequest,
    default_condiscon: &Condiscon,
) -> BridgeResult<Condiscon> {
    let mut packed_condiscon: Option<String> = None;
    let mut simple_attributes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for attribute in &request.extension_attributes {
        let segments = attribute.name.split('.').count();
        if segments == ATTRIBUTE_SEGMENTS {
            if !attribute.from_requested_attributes {
                tracing::warn!(
                    action = "request-flow",
                    warning = "Requesting individual irma attribute identifiers is only supported using the RequestedAttributes extension"
                );
                return Err(BridgeError::Configuration(
                    "Requesting individual irma attribute identifiers is only supported using the RequestedAttributes extension".to_string(),
                ));
            }
            let credential = credential_of(&attribute.name);
            let identifiers = simple_attributes.entry(credential).or_default();
            if !identifiers.insert(attribute.name.clone()) {
                tracing::warn!(
                    action = "request-flow",
                    warning = "Cannot request the same irma attribute identifier multiple times"
                );
                return Err(BridgeError::Configuration(
                    "Cannot request the same irma attribute identifier multiple times".to_string(),
                ));
            }
        } else if attribute.name.contains("condiscon") {
            for value in &attribute.values {
                if packed_condiscon.is_some() {
                    tracing::warn!(
                        action = "request-flow",
                        warning = "Cannot request for multiple condiscons"
                    );
                    return Err(BridgeError::Configuration(
                        "Cannot request for multiple condiscons".to_string(),
                    ));
                }
                packed_condiscon = Some(value.clone());
            }
        } else {
            tracing::warn!(
                action = "request-flow",
                warning = "Requested XML attribute name is invalid"
            );
            return Err(BridgeError::Configuration(
                "Requested XML attribute name is invalid".to_string(),
            ));
        }
    }

    if !simple_attributes.is_empty() {
        if packed_condiscon.is_some() {
            tracing::warn!(
                action = "request-flow",
                warning = "Cannot mix the condiscon and the requested attributes extension"
            );
            return Err(BridgeError::Configuration(
                "Cannot mix the condiscon and the requested attributes extension".to_string(),
            ));
        }
        return Ok(Condiscon::from_grouped(&simple_attributes));
    }

    if let Some(packed) = packed_condiscon.filter(|p| !p.is_empty()) {
        let condiscon = Condiscon::from_json(&packed).map_err(|e| {
            tracing::warn!(
                action = "request-flow",
                warning = "Requested condiscon could not be parsed",
                error = %e
            );
            BridgeError::Configuration("Requested condiscon could not be parsed".to_string())
        })?;
        condiscon.validate().map_err(|e| {
            BridgeError::Configuration(format!(
                "Requested condiscon contains an invalid attribute identifier: {e}"
            ))
        })?;
        return Ok(condiscon);
    }

    // Legacy carriers put the condiscon in the NameIDPolicy format field.
    // Best effort, a parse failure falls through to the default.
    if let Some(format) = &request.name_id_policy_format {
        match Condiscon::from_json(format) {
            Ok(condiscon) if condiscon.validate().is_ok() => return Ok(condiscon),
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "Could not convert nameIdPolicy format to a condiscons array: {format}"
                );
            }
        }
    }

    tracing::warn!(action = "request-flow", warning = "Requested attributeType is empty");
    Ok(default_condiscon.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::authn_request::ExtensionAttribute;
    use chrono::Utc;

    fn base_request() -> AuthnRequest {
        AuthnRequest {
            id: "_abc123".into(),
            issuer: "https://sp.example.org".into(),
            issue_instant: Utc::now(),
            assertion_consumer_service_url: None,
            provider_name: None,
            name_id_policy_format: None,
            extension_attributes: vec![],
        }
    }

    fn default_policy() -> Condiscon {
        Condiscon(vec![vec![vec![
            "irma-demo.gemeente.personalData.fullname".into(),
        ]]])
    }

    fn requested(name: &str) -> ExtensionAttribute {
        ExtensionAttribute {
            name: name.into(),
            values: vec![],
            from_requested_attributes: true,
        }
    }

    fn condiscon_blob(json: &str) -> ExtensionAttribute {
        ExtensionAttribute {
            name: "signicat:param:condiscon".into(),
            values: vec![json.into()],
            from_requested_attributes: false,
        }
    }

    #[test]
    fn test_simple_attributes_grouped_per_credential() {
        let mut request = base_request();
        request.extension_attributes = vec![
            requested("irma-demo.gemeente.personalData.fullname"),
            requested("irma-demo.gemeente.personalData.bsn"),
            requested("pbdf.sidn-pbdf.email.email"),
        ];
        let condiscon = extract_condiscon(&request, &default_policy()).unwrap();
        assert_eq!(
            condiscon.to_json(),
            r#"[[["irma-demo.gemeente.personalData.bsn","irma-demo.gemeente.personalData.fullname"]],[["pbdf.sidn-pbdf.email.email"]]]"#
        );
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut request = base_request();
        request.extension_attributes = vec![
            requested("irma-demo.gemeente.personalData.fullname"),
            requested("irma-demo.gemeente.personalData.fullname"),
        ];
        let err = extract_condiscon(&request, &default_policy()).unwrap_err();
        assert!(err.to_string().contains("multiple times"));
    }

    #[test]
    fn test_plain_attribute_with_identifier_name_rejected() {
        let mut request = base_request();
        request.extension_attributes = vec![ExtensionAttribute {
            name: "irma-demo.gemeente.personalData.fullname".into(),
            values: vec![],
            from_requested_attributes: false,
        }];
        let err = extract_condiscon(&request, &default_policy()).unwrap_err();
        assert!(err.to_string().contains("RequestedAttributes extension"));
    }

    #[test]
    fn test_invalid_attribute_name_rejected() {
        let mut request = base_request();
        request.extension_attributes = vec![requested("not-an-identifier")];
        let err = extract_condiscon(&request, &default_policy()).unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_packed_condiscon_parsed() {
        let mut request = base_request();
        request.extension_attributes = vec![condiscon_blob(r#"[[["a.b.c.d","a.b.c.e"]]]"#)];
        let condiscon = extract_condiscon(&request, &default_policy()).unwrap();
        assert_eq!(condiscon.to_json(), r#"[[["a.b.c.d","a.b.c.e"]]]"#);
    }

    #[test]
    fn test_unparseable_condiscon_rejected() {
        let mut request = base_request();
        request.extension_attributes = vec![condiscon_blob("{not json")];
        let err = extract_condiscon(&request, &default_policy()).unwrap_err();
        assert!(err.to_string().contains("could not be parsed"));
    }

    #[test]
    fn test_multiple_condiscons_rejected() {
        let mut request = base_request();
        request.extension_attributes = vec![ExtensionAttribute {
            name: "signicat:param:condiscon".into(),
            values: vec![r#"[[["a.b.c.d"]]]"#.into(), r#"[[["e.f.g.h"]]]"#.into()],
            from_requested_attributes: false,
        }];
        let err = extract_condiscon(&request, &default_policy()).unwrap_err();
        assert!(err.to_string().contains("multiple condiscons"));
    }

    #[test]
    fn test_mixed_sources_rejected_regardless_of_order() {
        for swap in [false, true] {
            let mut attributes = vec![
                requested("irma-demo.gemeente.personalData.fullname"),
                condiscon_blob(r#"[[["a.b.c.d"]]]"#),
            ];
            if swap {
                attributes.reverse();
            }
            let mut request = base_request();
            request.extension_attributes = attributes;
            let err = extract_condiscon(&request, &default_policy()).unwrap_err();
            assert!(err.to_string().contains("Cannot mix"));
        }
    }

    #[test]
    fn test_legacy_name_id_policy_condiscon() {
        let mut request = base_request();
        request.name_id_policy_format = Some(r#"[[["a.b.c.d"]]]"#.into());
        let condiscon = extract_condiscon(&request, &default_policy()).unwrap();
        assert_eq!(condiscon.to_json(), r#"[[["a.b.c.d"]]]"#);
    }

    #[test]
    fn test_legacy_parse_failure_falls_back_to_default() {
        let mut request = base_request();
        request.name_id_policy_format =
            Some("urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified".into());
        let condiscon = extract_condiscon(&request, &default_policy()).unwrap();
        assert_eq!(condiscon, default_policy());
    }

    #[test]
    fn test_no_sources_yields_default() {
        let condiscon = extract_condiscon(&base_request(), &default_policy()).unwrap();
        assert_eq!(condiscon, default_policy());
    }
}
