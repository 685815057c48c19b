//! Partner metadata registry and simple-signature verification
//!
//! All metadata documents in the configured directory are loaded once at
//! startup into an entityID-keyed registry of signing credentials and
//! response endpoints. Rotating partner metadata requires a restart.

use crate::error::{BridgeError, BridgeResult};
use crate::services::binding::{
    digest_for_sig_alg, RawRedirectQuery, RedirectParams, SignedContentSource,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::bn::BigNum;
use openssl::dsa::Dsa;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use openssl::sign::Verifier;
use openssl::x509::X509;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;

/// Binding URI of the browser-redirect response endpoint
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// A response endpoint advertised in partner metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionConsumerService {
    pub binding: String,
    pub location: String,
}

/// One partner's identity, signing credentials, and endpoints.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub credentials: Vec<PKey<Public>>,
    pub assertion_consumer_services: Vec<AssertionConsumerService>,
}

impl EntityDescriptor {
    /// The partner's preferred browser-redirect response endpoint, if any.
    #[must_use]
    pub fn redirect_assertion_consumer_service(&self) -> Option<&str> {
        self.assertion_consumer_services
            .iter()
            .find(|acs| acs.binding == BINDING_HTTP_REDIRECT)
            .map(|acs| acs.location.as_str())
    }
}

/// In-memory, read-only registry of partner descriptors.
#[derive(Debug)]
pub struct TrustStore {
    entities: HashMap<String, EntityDescriptor>,
}

impl TrustStore {
    /// Load every metadata document in a directory.
    pub fn from_directory(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let entries = std::fs::read_dir(path.as_ref()).map_err(|e| {
            BridgeError::Internal(format!(
                "could not read metadata directory {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let mut documents = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| BridgeError::Internal(format!("metadata listing: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let xml = std::fs::read_to_string(entry.path()).map_err(|e| {
                BridgeError::Internal(format!(
                    "could not read metadata {}: {e}",
                    entry.path().display()
                ))
            })?;
            documents.push(xml);
        }
        Self::from_documents(documents.iter().map(String::as_str))
    }

    /// Build a registry from in-memory metadata documents.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a str>) -> BridgeResult<Self> {
        let mut entities = HashMap::new();
        for document in documents {
            let descriptor = parse_entity_descriptor(document)?;
            tracing::info!(
                entity_id = %descriptor.entity_id,
                credentials = descriptor.credentials.len(),
                "registered metadata"
            );
            entities.insert(descriptor.entity_id.clone(), descriptor);
        }
        Ok(Self { entities })
    }

    /// Look up a partner descriptor by entity ID.
    #[must_use]
    pub fn entity(&self, entity_id: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity_id)
    }

    /// Authenticate a redirect-binding message claimed by `entity_id`.
    ///
    /// The detached signature covers the query string exactly as the
    /// sender transmitted it, so verification runs over `raw_query`, not
    /// over the decoded parameters. Requires the signature parameter pair
    /// to be present, tries every credential registered for the entity,
    /// and demands that at least one verification actually vouched for
    /// the message. A request without a signature never soft-passes.
    pub fn authenticate(
        &self,
        params: &RedirectParams,
        raw_query: &str,
        entity_id: &str,
    ) -> BridgeResult<&EntityDescriptor> {
        let (Some(signature), Some(sig_alg)) = (&params.signature, &params.sig_alg) else {
            return Err(BridgeError::Unauthenticated);
        };

        let entity = self.entities.get(entity_id).ok_or_else(|| {
            BridgeError::Signature(format!("No metadata registered for entity {entity_id}"))
        })?;

        let source = RawRedirectQuery::new(raw_query);
        let authenticated = verify_simple_signature(&source, signature, sig_alg, &entity.credentials)?;

        // The per-credential loop treats verifier errors as non-matches,
        // so insist on a positive verification having happened.
        if !authenticated {
            if entity.credentials.is_empty() {
                return Err(BridgeError::Unauthenticated);
            }
            return Err(BridgeError::Signature(format!(
                "Signature not validated by any credential of {entity_id}"
            )));
        }

        Ok(entity)
    }
}

/// Verify a detached simple signature over whatever content the source
/// says is covered. Verifier errors count as non-matches.
fn verify_simple_signature(
    source: &impl SignedContentSource,
    signature_b64: &str,
    sig_alg: &str,
    credentials: &[PKey<Public>],
) -> BridgeResult<bool> {
    let signature = BASE64
        .decode(signature_b64)
        .map_err(|e| BridgeError::Signature(format!("Invalid signature encoding: {e}")))?;
    let digest = digest_for_sig_alg(sig_alg)?;
    let content = source.signed_content();

    for credential in credentials {
        let verified = Verifier::new(digest, credential)
            .and_then(|mut verifier| {
                verifier.update(content.as_bytes())?;
                verifier.verify(&signature)
            })
            .unwrap_or(false);
        if verified {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Parse one metadata document into a descriptor.
fn parse_entity_descriptor(xml: &str) -> BridgeResult<EntityDescriptor> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entity_id = None;
    let mut credentials = Vec::new();
    let mut services = Vec::new();

    let mut in_key_descriptor = false;
    let mut current_element: Option<String> = None;
    let mut x509_certificate = None;
    let mut rsa_modulus = None;
    let mut rsa_exponent = None;
    let mut dsa_components: HashMap<&'static str, String> = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let name = e.local_name();
                let name_str = std::str::from_utf8(name.as_ref()).unwrap_or("");
                match name_str {
                    "EntityDescriptor" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            if key == "entityID" {
                                entity_id =
                                    Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                    }
                    "KeyDescriptor" => in_key_descriptor = true,
                    "X509Certificate" | "Modulus" | "Exponent" | "P" | "Q" | "G" | "Y"
                        if in_key_descriptor =>
                    {
                        current_element = Some(name_str.to_string());
                    }
                    "AssertionConsumerService" => {
                        let mut binding = String::new();
                        let mut location = String::new();
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key {
                                "Binding" => binding = value,
                                "Location" => location = value,
                                _ => {}
                            }
                        }
                        services.push(AssertionConsumerService { binding, location });
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(element) = &current_element {
                    let text: String = e
                        .unescape()
                        .unwrap_or_default()
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect();
                    match element.as_str() {
                        "X509Certificate" => x509_certificate = Some(text),
                        "Modulus" => rsa_modulus = Some(text),
                        "Exponent" => rsa_exponent = Some(text),
                        "P" => {
                            dsa_components.insert("P", text);
                        }
                        "Q" => {
                            dsa_components.insert("Q", text);
                        }
                        "G" => {
                            dsa_components.insert("G", text);
                        }
                        "Y" => {
                            dsa_components.insert("Y", text);
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                match name {
                    "KeyDescriptor" => {
                        in_key_descriptor = false;
                        if let Some(cert) = x509_certificate.take() {
                            credentials.push(certificate_credential(&cert)?);
                        }
                        if let (Some(modulus), Some(exponent)) =
                            (rsa_modulus.take(), rsa_exponent.take())
                        {
                            credentials.push(rsa_credential(&modulus, &exponent)?);
                        }
                        if dsa_components.len() == 4 {
                            credentials.push(dsa_credential(&dsa_components)?);
                        }
                        dsa_components.clear();
                    }
                    "X509Certificate" | "Modulus" | "Exponent" | "P" | "Q" | "G" | "Y" => {
                        current_element = None;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BridgeError::Internal(format!("metadata XML error: {e}")));
            }
            _ => {}
        }
    }

    let entity_id = entity_id
        .ok_or_else(|| BridgeError::Internal("metadata is missing an entityID".to_string()))?;

    Ok(EntityDescriptor {
        entity_id,
        credentials,
        assertion_consumer_services: services,
    })
}

fn certificate_credential(base64_der: &str) -> BridgeResult<PKey<Public>> {
    let der = BASE64
        .decode(base64_der)
        .map_err(|e| BridgeError::Internal(format!("metadata certificate base64: {e}")))?;
    let certificate = X509::from_der(&der)
        .map_err(|e| BridgeError::Internal(format!("metadata certificate: {e}")))?;
    certificate
        .public_key()
        .map_err(|e| BridgeError::Internal(format!("metadata certificate key: {e}")))
}

fn rsa_credential(modulus: &str, exponent: &str) -> BridgeResult<PKey<Public>> {
    let n = decode_crypto_binary(modulus)?;
    let e = decode_crypto_binary(exponent)?;
    let rsa = Rsa::from_public_components(n, e)
        .map_err(|e| BridgeError::Internal(format!("metadata RSA key: {e}")))?;
    PKey::from_rsa(rsa).map_err(|e| BridgeError::Internal(format!("metadata RSA key: {e}")))
}

fn dsa_credential(components: &HashMap<&'static str, String>) -> BridgeResult<PKey<Public>> {
    let p = decode_crypto_binary(&components["P"])?;
    let q = decode_crypto_binary(&components["Q"])?;
    let g = decode_crypto_binary(&components["G"])?;
    let y = decode_crypto_binary(&components["Y"])?;
    let dsa = Dsa::from_public_components(p, q, g, y)
        .map_err(|e| BridgeError::Internal(format!("metadata DSA key: {e}")))?;
    PKey::from_dsa(dsa).map_err(|e| BridgeError::Internal(format!("metadata DSA key: {e}")))
}

/// Decode a ds:CryptoBinary value: base64 of a big-endian unsigned integer.
fn decode_crypto_binary(text: &str) -> BridgeResult<BigNum> {
    let bytes = BASE64
        .decode(text)
        .map_err(|e| BridgeError::Internal(format!("metadata key value base64: {e}")))?;
    BigNum::from_slice(&bytes).map_err(|e| BridgeError::Internal(format!("metadata key value: {e}")))
}
