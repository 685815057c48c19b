//! SAML Response construction, signing, and self-verification
//!
//! Builds the success or failure Response for the assert flow, signs the
//! whole document with an enveloped RSA-SHA256 signature over its exclusive
//! canonicalization, then immediately re-verifies the produced signature.
//! A response that fails its own verification is never released.

use crate::error::{BridgeError, BridgeResult};
use crate::keys::KeyMaterial;
use crate::models::AssertParameters;
use crate::saml::{xml_escape, Disclosure};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::RngCore;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
const STATUS_AUTHN_FAILED: &str = "urn:oasis:names:tc:SAML:2.0:status:AuthnFailed";
const NAME_ID_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";
const AUTHN_CONTEXT_PASSWORD_PROTECTED: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";

/// Builds signed SAML responses for one configured issuer.
pub struct ResponseBuilder {
    issuer_name: String,
    response_ttl_secs: u64,
}

impl ResponseBuilder {
    #[must_use]
    pub fn new(issuer_name: impl Into<String>, response_ttl_secs: u64) -> Self {
        Self {
            issuer_name: issuer_name.into(),
            response_ttl_secs,
        }
    }

    /// Build, sign, and self-verify a success response carrying the
    /// accepted attributes. Returns the base64 transport form.
    pub fn build_success(
        &self,
        keys: &KeyMaterial,
        parameters: &AssertParameters,
        disclosure: &Disclosure,
    ) -> BridgeResult<String> {
        // The response ID refers to the IRMA session when one is known.
        let response_id = disclosure
            .token
            .clone()
            .unwrap_or_else(generate_identifier);
        let xml = self.build_response_xml(parameters, Some(disclosure), &response_id)?;
        self.sign_and_release(keys, xml, &response_id)
    }

    /// Build, sign, and self-verify a failure response. The status message
    /// comes from the propagated error descriptor, empty when absent.
    pub fn build_failure(
        &self,
        keys: &KeyMaterial,
        parameters: &AssertParameters,
    ) -> BridgeResult<String> {
        let response_id = generate_identifier();
        let xml = self.build_response_xml(parameters, None, &response_id)?;
        self.sign_and_release(keys, xml, &response_id)
    }

    fn sign_and_release(
        &self,
        keys: &KeyMaterial,
        xml: String,
        response_id: &str,
    ) -> BridgeResult<String> {
        let signed = sign_response(keys, &xml, response_id)?;

        // Always validate our own signature before handing the response out.
        verify_own_signature(keys, &signed)?;

        Ok(BASE64.encode(signed.as_bytes()))
    }

    fn build_response_xml(
        &self,
        parameters: &AssertParameters,
        disclosure: Option<&Disclosure>,
        response_id: &str,
    ) -> BridgeResult<String> {
        let now = Utc::now();
        let until = now + Duration::seconds(self.response_ttl_secs as i64);
        let now_str = format_instant(now);
        let until_str = format_instant(until);

        let mut xml = String::with_capacity(4096);
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push_str(r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" Version="2.0""#);
        xml.push_str(&format!(r#" ID="{}""#, xml_escape(response_id)));
        xml.push_str(&format!(r#" IssueInstant="{now_str}""#));
        if let Some(destination) = &parameters.service_url {
            xml.push_str(&format!(r#" Destination="{}""#, xml_escape(destination)));
        }
        if let Some(request_id) = &parameters.request_id {
            xml.push_str(&format!(r#" InResponseTo="{}""#, xml_escape(request_id)));
        }
        xml.push('>');
        xml.push_str(&format!(
            "<saml:Issuer>{}</saml:Issuer>",
            xml_escape(&self.issuer_name)
        ));

        match disclosure {
            Some(disclosure) => {
                xml.push_str(&format!(
                    r#"<samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"/></samlp:Status>"#
                ));
                xml.push_str(&self.build_assertion_xml(
                    parameters, disclosure, response_id, &now_str, &until_str,
                ));
            }
            None => {
                let message = parameters
                    .request_error
                    .as_ref()
                    .map(|error| error.message.as_str())
                    .unwrap_or("");
                xml.push_str(&format!(
                    r#"<samlp:Status><samlp:StatusCode Value="{STATUS_RESPONDER}"><samlp:StatusCode Value="{STATUS_AUTHN_FAILED}"/></samlp:StatusCode><samlp:StatusMessage>{}</samlp:StatusMessage></samlp:Status>"#,
                    xml_escape(message)
                ));
            }
        }

        xml.push_str("</samlp:Response>");
        Ok(xml)
    }

    fn build_assertion_xml(
        &self,
        parameters: &AssertParameters,
        disclosure: &Disclosure,
        response_id: &str,
        now_str: &str,
        until_str: &str,
    ) -> String {
        let assertion_id = format!("_{}", hex::encode_upper(response_id.as_bytes()));

        let mut xml = String::with_capacity(2048);
        // The xs/xsi prefixes used by AttributeValue typing are declared
        // here; declaring them on the value element itself breaks
        // attribute ordering during canonicalization.
        xml.push_str(&format!(
            r#"<saml:Assertion xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="{}" Version="2.0" IssueInstant="{now_str}">"#,
            xml_escape(&assertion_id)
        ));
        xml.push_str(&format!(
            "<saml:Issuer>{}</saml:Issuer>",
            xml_escape(&self.issuer_name)
        ));

        xml.push_str("<saml:Subject>");
        if let Some((_, first_value)) = disclosure.attributes.iter().next() {
            xml.push_str(&format!(
                r#"<saml:NameID Format="{NAME_ID_TRANSIENT}">{}</saml:NameID>"#,
                xml_escape(first_value)
            ));
        }
        xml.push_str(r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#);
        xml.push_str(&format!(r#"<saml:SubjectConfirmationData NotOnOrAfter="{until_str}""#));
        if let Some(recipient) = &parameters.service_url {
            xml.push_str(&format!(r#" Recipient="{}""#, xml_escape(recipient)));
        }
        if let Some(request_id) = &parameters.request_id {
            xml.push_str(&format!(r#" InResponseTo="{}""#, xml_escape(request_id)));
        }
        xml.push_str("/></saml:SubjectConfirmation></saml:Subject>");

        xml.push_str(&format!(
            r#"<saml:Conditions NotBefore="{now_str}" NotOnOrAfter="{until_str}">"#
        ));
        xml.push_str("<saml:AudienceRestriction><saml:Audience>");
        xml.push_str(&xml_escape(parameters.issuer.as_deref().unwrap_or("")));
        xml.push_str("</saml:Audience></saml:AudienceRestriction></saml:Conditions>");

        xml.push_str(&format!(
            r#"<saml:AuthnStatement AuthnInstant="{now_str}"><saml:AuthnContext><saml:AuthnContextClassRef>{AUTHN_CONTEXT_PASSWORD_PROTECTED}</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#
        ));

        xml.push_str("<saml:AttributeStatement>");
        for (id, value) in &disclosure.attributes {
            xml.push_str(&format!(
                r#"<saml:Attribute Name="{}"><saml:AttributeValue xsi:type="xs:string">{}</saml:AttributeValue></saml:Attribute>"#,
                xml_escape(id),
                xml_escape(value)
            ));
        }
        xml.push_str("</saml:AttributeStatement>");

        xml.push_str("</saml:Assertion>");
        xml
    }
}

/// A fresh random 20-byte identifier, base64.
fn generate_identifier() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Sign the whole response with an enveloped signature placed directly
/// after the response-level Issuer.
fn sign_response(keys: &KeyMaterial, response_xml: &str, response_id: &str) -> BridgeResult<String> {
    // The enveloped-signature transform removes the signature itself, so
    // the digest is computed before insertion.
    let canonicalized = canonicalize_xml(response_xml)?;
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalized.as_bytes())
        .map_err(|e| BridgeError::Internal(format!("digest failed: {e}")))?;
    let digest_b64 = BASE64.encode(digest);

    let mut signed_info = String::new();
    signed_info.push_str(r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#);
    signed_info.push_str(
        r#"<ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>"#,
    );
    signed_info.push_str(
        r#"<ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>"#,
    );
    signed_info.push_str(&format!(
        "<ds:Reference URI=\"#{}\">",
        xml_escape(response_id)
    ));
    signed_info.push_str("<ds:Transforms>");
    signed_info.push_str(
        r#"<ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/>"#,
    );
    signed_info
        .push_str(r#"<ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>"#);
    signed_info.push_str("</ds:Transforms>");
    signed_info
        .push_str(r#"<ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>"#);
    signed_info.push_str(&format!("<ds:DigestValue>{digest_b64}</ds:DigestValue>"));
    signed_info.push_str("</ds:Reference></ds:SignedInfo>");

    let canonicalized_signed_info = canonicalize_xml(&signed_info)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &keys.saml_signing_key)
        .map_err(|e| BridgeError::Internal(format!("signer creation failed: {e}")))?;
    signer
        .update(canonicalized_signed_info.as_bytes())
        .map_err(|e| BridgeError::Internal(format!("signing failed: {e}")))?;
    let signature = signer
        .sign_to_vec()
        .map_err(|e| BridgeError::Internal(format!("signing failed: {e}")))?;
    let signature_b64 = BASE64.encode(signature);

    let mut signature_xml = String::new();
    signature_xml.push_str(r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#);
    signature_xml.push_str(&signed_info);
    signature_xml.push_str(&format!(
        "<ds:SignatureValue>{signature_b64}</ds:SignatureValue>"
    ));
    signature_xml.push_str(&format!(
        "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
        keys.saml_certificate_b64
    ));
    signature_xml.push_str("</ds:Signature>");

    let after_issuer = response_xml
        .find("</saml:Issuer>")
        .map(|pos| pos + "</saml:Issuer>".len())
        .ok_or_else(|| BridgeError::Internal("response has no Issuer element".to_string()))?;

    let mut result = String::with_capacity(response_xml.len() + signature_xml.len());
    result.push_str(&response_xml[..after_issuer]);
    result.push_str(&signature_xml);
    result.push_str(&response_xml[after_issuer..]);
    Ok(result)
}

/// Re-verify a freshly produced response with our own certificate.
///
/// Any failure here is an internal fault, never a user policy failure.
fn verify_own_signature(keys: &KeyMaterial, signed_xml: &str) -> BridgeResult<()> {
    // No DTDs in our own output; also blocks XXE during re-parsing.
    if signed_xml.contains("<!DOCTYPE") {
        return Err(BridgeError::Internal(
            "response contains a DOCTYPE declaration".to_string(),
        ));
    }

    let info = extract_signature_info(signed_xml)?;

    let without_signature = remove_signature_element(signed_xml);
    let canonicalized = canonicalize_xml(&without_signature)?;
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalized.as_bytes())
        .map_err(|e| BridgeError::Internal(format!("digest failed: {e}")))?;
    if BASE64.encode(digest) != info.digest_value.replace(['\n', '\r', ' '], "") {
        return Err(BridgeError::Internal(
            "self-verification digest mismatch".to_string(),
        ));
    }

    let der = BASE64
        .decode(&keys.saml_certificate_b64)
        .map_err(|e| BridgeError::Internal(format!("own certificate base64: {e}")))?;
    let certificate =
        X509::from_der(&der).map_err(|e| BridgeError::Internal(format!("own certificate: {e}")))?;
    let public_key = certificate
        .public_key()
        .map_err(|e| BridgeError::Internal(format!("own certificate key: {e}")))?;

    let signature = BASE64
        .decode(info.signature_value.replace(['\n', '\r', ' '], ""))
        .map_err(|e| BridgeError::Internal(format!("signature base64: {e}")))?;
    let canonicalized_signed_info = canonicalize_xml(&info.signed_info)?;

    let verified = Verifier::new(MessageDigest::sha256(), &public_key)
        .and_then(|mut verifier| {
            verifier.update(canonicalized_signed_info.as_bytes())?;
            verifier.verify(&signature)
        })
        .map_err(|e| BridgeError::Internal(format!("self-verification failed: {e}")))?;

    if !verified {
        return Err(BridgeError::Internal(
            "self-verification rejected our signature".to_string(),
        ));
    }
    Ok(())
}

struct SignatureInfo {
    signed_info: String,
    signature_value: String,
    digest_value: String,
}

/// Pull the SignedInfo block, SignatureValue, and DigestValue out of a
/// signed document.
fn extract_signature_info(xml: &str) -> BridgeResult<SignatureInfo> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut in_signed_info = false;
    let mut in_signature_value = false;
    let mut in_digest_value = false;
    let mut signed_info = String::new();
    let mut signature_value = String::new();
    let mut digest_value = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                if name == "SignedInfo" {
                    in_signed_info = true;
                }
                if in_signed_info {
                    let full_tag = std::str::from_utf8(&e).unwrap_or("");
                    signed_info.push('<');
                    signed_info.push_str(full_tag);
                    signed_info.push('>');
                    // DigestValue lives inside SignedInfo.
                    if name == "DigestValue" {
                        in_digest_value = true;
                    }
                } else if name == "SignatureValue" {
                    in_signature_value = true;
                }
            }
            Ok(Event::Empty(e)) => {
                if in_signed_info {
                    let full_tag = std::str::from_utf8(&e).unwrap_or("");
                    signed_info.push('<');
                    signed_info.push_str(full_tag);
                    signed_info.push_str("/>");
                }
            }
            Ok(Event::End(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                if in_signed_info {
                    signed_info.push_str("</");
                    signed_info.push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or(""));
                    signed_info.push('>');
                    if name == "DigestValue" {
                        in_digest_value = false;
                    }
                    if name == "SignedInfo" {
                        in_signed_info = false;
                    }
                } else if name == "SignatureValue" {
                    in_signature_value = false;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_signed_info {
                    signed_info.push_str(&text);
                    if in_digest_value {
                        digest_value.push_str(&text);
                    }
                } else if in_signature_value {
                    signature_value.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BridgeError::Internal(format!(
                    "signed response XML error: {e}"
                )));
            }
            _ => {}
        }
    }

    if signed_info.is_empty() || signature_value.is_empty() {
        return Err(BridgeError::Internal(
            "response is missing its signature".to_string(),
        ));
    }

    Ok(SignatureInfo {
        signed_info,
        signature_value,
        digest_value,
    })
}

/// Remove the ds:Signature element (the enveloped-signature transform).
fn remove_signature_element(xml: &str) -> String {
    if let (Some(start), Some(end)) = (xml.find("<ds:Signature"), xml.find("</ds:Signature>")) {
        let mut result = String::with_capacity(xml.len());
        result.push_str(&xml[..start]);
        result.push_str(&xml[end + "</ds:Signature>".len()..]);
        return result;
    }
    xml.to_string()
}

/// Exclusive XML canonicalization, comments excluded.
fn canonicalize_xml(xml: &str) -> BridgeResult<String> {
    let mut output = Vec::new();
    xml_canonicalization::Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| BridgeError::Internal(format!("canonicalization failed: {e}")))?;
    String::from_utf8(output)
        .map_err(|e| BridgeError::Internal(format!("canonicalized XML not UTF-8: {e}")))
}
