//! SAML `AuthnRequest` parsing and serialization

use crate::error::{BridgeError, BridgeResult};
use crate::saml::xml_escape;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Maximum length for the AuthnRequest ID attribute
const MAX_REQUEST_ID_LENGTH: usize = 256;

/// Maximum length for the Issuer element value
const MAX_ISSUER_LENGTH: usize = 1024;

/// An attribute found in the request's `<Extensions>` block.
///
/// The policy layer distinguishes attributes delivered through the
/// `RequestedAttributes` extension from plain `<Attribute>` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionAttribute {
    pub name: String,
    pub values: Vec<String>,
    pub from_requested_attributes: bool,
}

/// Parsed SAML `AuthnRequest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issuer: String,
    pub issue_instant: DateTime<Utc>,
    pub assertion_consumer_service_url: Option<String>,
    pub provider_name: Option<String>,
    pub name_id_policy_format: Option<String>,
    pub extension_attributes: Vec<ExtensionAttribute>,
}

impl AuthnRequest {
    /// Parse an `AuthnRequest` document.
    pub fn from_xml(xml: &str) -> BridgeResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut id = None;
        let mut issuer = None;
        let mut issue_instant_raw = None;
        let mut acs_url = None;
        let mut provider_name = None;
        let mut name_id_format = None;
        let mut extension_attributes = Vec::new();

        let mut in_issuer = false;
        let mut in_extensions = false;
        let mut in_requested_attributes = false;
        let mut in_attribute_value = false;
        let mut current_attribute: Option<ExtensionAttribute> = None;

        loop {
            match reader.read_event() {
                Ok(event @ (Event::Start(_) | Event::Empty(_))) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let e = match event {
                        Event::Start(e) | Event::Empty(e) => e,
                        _ => continue,
                    };
                    let name = e.local_name();
                    let name_str = std::str::from_utf8(name.as_ref()).unwrap_or("");

                    match name_str {
                        "AuthnRequest" => {
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                let value = attr.unescape_value().unwrap_or_default();

                                match key {
                                    "ID" => id = Some(value.to_string()),
                                    "IssueInstant" => issue_instant_raw = Some(value.to_string()),
                                    "AssertionConsumerServiceURL" => {
                                        acs_url = Some(value.to_string());
                                    }
                                    "ProviderName" => provider_name = Some(value.to_string()),
                                    _ => {}
                                }
                            }
                        }
                        "Issuer" if !in_extensions => in_issuer = true,
                        "NameIDPolicy" => {
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                if key == "Format" {
                                    name_id_format =
                                        Some(attr.unescape_value().unwrap_or_default().to_string());
                                }
                            }
                        }
                        "Extensions" => in_extensions = true,
                        "RequestedAttributes" if in_extensions => in_requested_attributes = true,
                        "RequestedAttribute" | "Attribute" if in_extensions => {
                            let mut attribute_name = String::new();
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                if key == "Name" {
                                    attribute_name =
                                        attr.unescape_value().unwrap_or_default().to_string();
                                }
                            }
                            let attribute = ExtensionAttribute {
                                name: attribute_name,
                                values: Vec::new(),
                                from_requested_attributes: in_requested_attributes
                                    || name_str == "RequestedAttribute",
                            };
                            if is_empty {
                                extension_attributes.push(attribute);
                            } else {
                                current_attribute = Some(attribute);
                            }
                        }
                        "AttributeValue" if current_attribute.is_some() => {
                            in_attribute_value = true;
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if in_issuer {
                        issuer = Some(text);
                    } else if in_attribute_value {
                        if let Some(attribute) = current_attribute.as_mut() {
                            attribute.values.push(text);
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    let local_name = e.local_name();
                    let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                    match name {
                        "Issuer" => in_issuer = false,
                        "Extensions" => in_extensions = false,
                        "RequestedAttributes" => in_requested_attributes = false,
                        "RequestedAttribute" | "Attribute" => {
                            if let Some(attribute) = current_attribute.take() {
                                extension_attributes.push(attribute);
                            }
                        }
                        "AttributeValue" => in_attribute_value = false,
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(BridgeError::Decoding(format!("XML parse error: {e}")));
                }
                _ => {}
            }
        }

        let id = id.ok_or_else(|| BridgeError::Decoding("Missing ID attribute".to_string()))?;
        if id.len() > MAX_REQUEST_ID_LENGTH {
            return Err(BridgeError::Decoding(format!(
                "ID attribute exceeds maximum length of {MAX_REQUEST_ID_LENGTH} characters"
            )));
        }

        let issuer =
            issuer.ok_or_else(|| BridgeError::Decoding("Missing Issuer element".to_string()))?;
        if issuer.len() > MAX_ISSUER_LENGTH {
            return Err(BridgeError::Decoding(format!(
                "Issuer exceeds maximum length of {MAX_ISSUER_LENGTH} characters"
            )));
        }

        let issue_instant_raw = issue_instant_raw
            .ok_or_else(|| BridgeError::Decoding("Missing IssueInstant attribute".to_string()))?;
        let issue_instant = DateTime::parse_from_rfc3339(&issue_instant_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| BridgeError::Decoding(format!("Invalid IssueInstant format: {e}")))?;

        Ok(AuthnRequest {
            id,
            issuer,
            issue_instant,
            assertion_consumer_service_url: acs_url,
            provider_name,
            name_id_policy_format: name_id_format,
            extension_attributes,
        })
    }

    /// Reject requests whose `IssueInstant` is older than the TTL.
    pub fn check_age(&self, ttl_secs: u64, now: DateTime<Utc>) -> BridgeResult<()> {
        let age_secs = (now - self.issue_instant).num_seconds();
        if age_secs > ttl_secs as i64 {
            return Err(BridgeError::ExpiredRequest);
        }
        Ok(())
    }

    /// Service-provider name for the IRMA mapping: lowercased
    /// `ProviderName`, or "test" when the request carries none.
    #[must_use]
    pub fn sp_name(&self) -> String {
        self.provider_name
            .as_deref()
            .map_or_else(|| "test".to_string(), str::to_lowercase)
    }

    /// Serialize back to the wire XML form.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push_str(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" Version="2.0""#,
        );
        xml.push_str(&format!(r#" ID="{}""#, xml_escape(&self.id)));
        xml.push_str(&format!(
            r#" IssueInstant="{}""#,
            self.issue_instant.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        if let Some(acs) = &self.assertion_consumer_service_url {
            xml.push_str(&format!(
                r#" AssertionConsumerServiceURL="{}""#,
                xml_escape(acs)
            ));
        }
        if let Some(provider_name) = &self.provider_name {
            xml.push_str(&format!(r#" ProviderName="{}""#, xml_escape(provider_name)));
        }
        xml.push('>');
        xml.push_str(&format!(
            "<saml:Issuer>{}</saml:Issuer>",
            xml_escape(&self.issuer)
        ));
        if let Some(format) = &self.name_id_policy_format {
            xml.push_str(&format!(
                r#"<samlp:NameIDPolicy Format="{}"/>"#,
                xml_escape(format)
            ));
        }
        if !self.extension_attributes.is_empty() {
            xml.push_str("<samlp:Extensions>");
            let requested: Vec<_> = self
                .extension_attributes
                .iter()
                .filter(|a| a.from_requested_attributes)
                .collect();
            if !requested.is_empty() {
                xml.push_str(
                    r#"<req-attr:RequestedAttributes xmlns:req-attr="urn:oasis:names:tc:SAML:protocol:ext:req-attr">"#,
                );
                for attribute in requested {
                    xml.push_str(&format!(
                        r#"<req-attr:RequestedAttribute Name="{}"/>"#,
                        xml_escape(&attribute.name)
                    ));
                }
                xml.push_str("</req-attr:RequestedAttributes>");
            }
            for attribute in self
                .extension_attributes
                .iter()
                .filter(|a| !a.from_requested_attributes)
            {
                xml.push_str(&format!(
                    r#"<saml:Attribute Name="{}">"#,
                    xml_escape(&attribute.name)
                ));
                for value in &attribute.values {
                    xml.push_str(&format!(
                        "<saml:AttributeValue>{}</saml:AttributeValue>",
                        xml_escape(value)
                    ));
                }
                xml.push_str("</saml:Attribute>");
            }
            xml.push_str("</samlp:Extensions>");
        }
        xml.push_str("</samlp:AuthnRequest>");
        xml
    }
}
