//! HTTP-Redirect binding codec
//!
//! Carries SAML messages in a GET query string: XML is deflated with a raw
//! (headerless) stream, base64 encoded, and optionally covered by a
//! detached signature over the URL-encoded parameter string.

use crate::error::{BridgeError, BridgeResult};
use crate::saml::AuthnRequest;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use serde::Deserialize;
use std::io::{Read, Write};

/// The only compression method the redirect binding supports
pub const DEFLATE_ENCODING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:URL-Encoding:DEFLATE";

/// Default signature algorithm for synthetic signed requests
pub const SIG_ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Maximum encoded size for a SAMLRequest parameter (128 KB).
/// Rejected before base64 decoding to bound memory use.
const MAX_ENCODED_SIZE: usize = 128 * 1024;

/// Maximum decompressed size (64 KB) to stop deflate bombs
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Query parameters of the HTTP-Redirect binding, as received
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
    #[serde(rename = "SigAlg")]
    pub sig_alg: Option<String>,
    #[serde(rename = "Signature")]
    pub signature: Option<String>,
    #[serde(rename = "SAMLEncoding")]
    pub saml_encoding: Option<String>,
}

/// Strategy seam between a binding and signature verification: yields the
/// exact byte string a detached signature covers. The trust store only
/// ever sees this, never the binding's parameters.
pub trait SignedContentSource {
    fn signed_content(&self) -> String;
}

impl RedirectParams {
    /// Decode the carried `AuthnRequest`.
    pub fn decode(&self) -> BridgeResult<AuthnRequest> {
        if let Some(encoding) = &self.saml_encoding {
            if encoding != DEFLATE_ENCODING {
                return Err(BridgeError::Decoding(format!(
                    "Unsupported SAMLEncoding: {encoding}"
                )));
            }
        }
        let xml = inflate_message(&self.saml_request)?;
        AuthnRequest::from_xml(&xml)
    }

    /// Render the parameters as the query string a browser redirect would
    /// carry.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut query = format!("SAMLRequest={}", urlencoding::encode(&self.saml_request));
        if let Some(relay_state) = &self.relay_state {
            query.push_str("&RelayState=");
            query.push_str(&urlencoding::encode(relay_state));
        }
        if let Some(sig_alg) = &self.sig_alg {
            query.push_str("&SigAlg=");
            query.push_str(&urlencoding::encode(sig_alg));
        }
        if let Some(signature) = &self.signature {
            query.push_str("&Signature=");
            query.push_str(&urlencoding::encode(signature));
        }
        if let Some(encoding) = &self.saml_encoding {
            query.push_str("&SAMLEncoding=");
            query.push_str(&urlencoding::encode(encoding));
        }
        query
    }
}

/// The raw, as-transmitted query string of a redirect-binding request.
///
/// A detached signature covers the exact wire bytes the sender produced,
/// so senders whose URL encoder differs from ours must still verify. The
/// covered parameters are therefore cut out of the raw query untouched,
/// never decoded and re-encoded.
pub struct RawRedirectQuery<'a> {
    raw_query: &'a str,
}

impl<'a> RawRedirectQuery<'a> {
    #[must_use]
    pub fn new(raw_query: &'a str) -> Self {
        Self { raw_query }
    }
}

impl SignedContentSource for RawRedirectQuery<'_> {
    /// Parameter order is fixed by the binding:
    /// `SAMLRequest=value&RelayState=value&SigAlg=value`, each pair kept
    /// exactly as transmitted, RelayState omitted when absent.
    fn signed_content(&self) -> String {
        let mut content = String::new();
        for name in ["SAMLRequest", "RelayState", "SigAlg"] {
            let pair = self.raw_query.split('&').find(|pair| {
                pair.strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with('='))
            });
            if let Some(pair) = pair {
                if !content.is_empty() {
                    content.push('&');
                }
                content.push_str(pair);
            }
        }
        content
    }
}

/// Base64-decode and inflate a redirect-binding message.
pub fn inflate_message(encoded: &str) -> BridgeResult<String> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(BridgeError::Decoding(format!(
            "Encoded SAMLRequest exceeds maximum size ({} > {MAX_ENCODED_SIZE} bytes)",
            encoded.len()
        )));
    }
    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| BridgeError::Decoding(format!("Base64 decode failed: {e}")))?;

    let decoder = DeflateDecoder::new(&compressed[..]);
    let mut xml = String::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| BridgeError::Decoding(format!("Deflate decode failed: {e}")))?;
    if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
        return Err(BridgeError::Decoding(
            "Decompressed SAMLRequest exceeds maximum size limit (64 KB)".to_string(),
        ));
    }
    Ok(xml)
}

/// Deflate and base64-encode a message for the redirect binding.
pub fn deflate_message(xml: &str) -> BridgeResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .and_then(|()| encoder.finish())
        .map(|compressed| BASE64.encode(compressed))
        .map_err(|e| BridgeError::Internal(format!("Deflate encode failed: {e}")))
}

/// Encode an `AuthnRequest` into redirect-binding parameters, optionally
/// with a detached signature. Used to construct synthetic requests.
pub fn encode_request(
    request: &AuthnRequest,
    relay_state: Option<&str>,
    signer: Option<&PKey<Private>>,
) -> BridgeResult<RedirectParams> {
    let mut params = RedirectParams {
        saml_request: deflate_message(&request.to_xml())?,
        relay_state: relay_state.map(String::from),
        sig_alg: None,
        signature: None,
        saml_encoding: Some(DEFLATE_ENCODING.to_string()),
    };

    if let Some(key) = signer {
        params.sig_alg = Some(SIG_ALG_RSA_SHA256.to_string());
        // Sign the wire form of the query we are about to transmit.
        let query = params.to_query_string();
        let content = RawRedirectQuery::new(&query).signed_content();
        let mut signer = Signer::new(MessageDigest::sha256(), key)
            .map_err(|e| BridgeError::Internal(format!("Signer creation failed: {e}")))?;
        signer
            .update(content.as_bytes())
            .map_err(|e| BridgeError::Internal(format!("Signing failed: {e}")))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| BridgeError::Internal(format!("Signing failed: {e}")))?;
        params.signature = Some(BASE64.encode(signature));
    }

    Ok(params)
}

/// Map a signature-algorithm URI to its digest.
pub fn digest_for_sig_alg(sig_alg: &str) -> BridgeResult<MessageDigest> {
    match sig_alg {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(MessageDigest::sha512()),
        alg => Err(BridgeError::Signature(format!(
            "Unsupported signature algorithm: {alg}"
        ))),
    }
}
