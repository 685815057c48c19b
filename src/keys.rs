//! Key material loaded at startup
//!
//! Keys are accepted in PEM or DER form. JWT keys are normalized to PEM for
//! the token layer, the SAML pair stays in openssl form for XML signing.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use openssl::pkey::{PKey, Private, Public};
use openssl::x509::X509;
use std::path::Path;

/// All cryptographic material the bridge needs, loaded once and shared
/// read-only between workers.
pub struct KeyMaterial {
    /// Signs self-issued session tokens
    pub jwt_encoding: EncodingKey,
    /// Verifies self-issued session tokens; the public half of the above
    pub jwt_decoding: DecodingKey,
    /// Verifies disclosure results coming back from the IRMA server
    pub irma_decoding: DecodingKey,
    /// Signs outgoing SAML responses
    pub saml_signing_key: PKey<Private>,
    /// Certificate advertised in metadata and embedded in signatures,
    /// base64 of the DER encoding
    pub saml_certificate_b64: String,
}

impl KeyMaterial {
    /// Load every key the configuration points at.
    pub fn load(config: &BridgeConfig) -> BridgeResult<Self> {
        let jwt_private = read_private_key(&config.jwt_private_key_path)?;
        let irma_public = read_public_key(&config.irma_public_key_path)?;
        let saml_signing_key = read_private_key(&config.saml_private_key_path)?;
        let saml_certificate = read_certificate(&config.saml_certificate_path)?;

        Self::assemble(jwt_private, irma_public, saml_signing_key, saml_certificate)
    }

    /// Build key material from in-memory PEM documents.
    pub fn from_pems(
        jwt_private_pem: &[u8],
        irma_public_pem: &[u8],
        saml_private_pem: &[u8],
        saml_certificate_pem: &[u8],
    ) -> BridgeResult<Self> {
        let jwt_private = PKey::private_key_from_pem(jwt_private_pem)
            .map_err(|e| BridgeError::Internal(format!("invalid JWT private key: {e}")))?;
        let irma_public = PKey::public_key_from_pem(irma_public_pem)
            .map_err(|e| BridgeError::Internal(format!("invalid IRMA public key: {e}")))?;
        let saml_signing_key = PKey::private_key_from_pem(saml_private_pem)
            .map_err(|e| BridgeError::Internal(format!("invalid SAML private key: {e}")))?;
        let saml_certificate = X509::from_pem(saml_certificate_pem)
            .map_err(|e| BridgeError::Internal(format!("invalid SAML certificate: {e}")))?;

        Self::assemble(jwt_private, irma_public, saml_signing_key, saml_certificate)
    }

    fn assemble(
        jwt_private: PKey<Private>,
        irma_public: PKey<Public>,
        saml_signing_key: PKey<Private>,
        saml_certificate: X509,
    ) -> BridgeResult<Self> {
        let jwt_encoding = encoding_key(&jwt_private)?;
        let jwt_decoding = decoding_key_for_private(&jwt_private)?;
        let irma_decoding = decoding_key(&irma_public)?;

        let cert_der = saml_certificate
            .to_der()
            .map_err(|e| BridgeError::Internal(format!("certificate not encodable: {e}")))?;

        Ok(Self {
            jwt_encoding,
            jwt_decoding,
            irma_decoding,
            saml_signing_key,
            saml_certificate_b64: BASE64.encode(cert_der),
        })
    }
}

fn read_key_bytes(path: impl AsRef<Path>) -> BridgeResult<Vec<u8>> {
    std::fs::read(path.as_ref()).map_err(|e| {
        BridgeError::Internal(format!("could not read {}: {e}", path.as_ref().display()))
    })
}

/// Read a private key, accepting PEM or PKCS8 DER.
fn read_private_key(path: impl AsRef<Path>) -> BridgeResult<PKey<Private>> {
    let bytes = read_key_bytes(&path)?;
    let parsed = if bytes.starts_with(b"-----BEGIN") {
        PKey::private_key_from_pem(&bytes)
    } else {
        PKey::private_key_from_pkcs8(&bytes)
    };
    parsed.map_err(|e| {
        BridgeError::Internal(format!(
            "invalid private key {}: {e}",
            path.as_ref().display()
        ))
    })
}

/// Read a public key, accepting PEM or SPKI DER.
fn read_public_key(path: impl AsRef<Path>) -> BridgeResult<PKey<Public>> {
    let bytes = read_key_bytes(&path)?;
    let parsed = if bytes.starts_with(b"-----BEGIN") {
        PKey::public_key_from_pem(&bytes)
    } else {
        PKey::public_key_from_der(&bytes)
    };
    parsed.map_err(|e| {
        BridgeError::Internal(format!(
            "invalid public key {}: {e}",
            path.as_ref().display()
        ))
    })
}

/// Read an X.509 certificate, accepting PEM or DER.
fn read_certificate(path: impl AsRef<Path>) -> BridgeResult<X509> {
    let bytes = read_key_bytes(&path)?;
    let parsed = if bytes.starts_with(b"-----BEGIN") {
        X509::from_pem(&bytes)
    } else {
        X509::from_der(&bytes)
    };
    parsed.map_err(|e| {
        BridgeError::Internal(format!(
            "invalid certificate {}: {e}",
            path.as_ref().display()
        ))
    })
}

fn encoding_key(key: &PKey<Private>) -> BridgeResult<EncodingKey> {
    let pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| BridgeError::Internal(format!("private key not encodable: {e}")))?;
    EncodingKey::from_rsa_pem(&pem)
        .map_err(|e| BridgeError::Internal(format!("private key not usable for RS256: {e}")))
}

fn decoding_key(key: &PKey<Public>) -> BridgeResult<DecodingKey> {
    let pem = key
        .public_key_to_pem()
        .map_err(|e| BridgeError::Internal(format!("public key not encodable: {e}")))?;
    DecodingKey::from_rsa_pem(&pem)
        .map_err(|e| BridgeError::Internal(format!("public key not usable for RS256: {e}")))
}

/// Derive the verification key matching a private key, so self-issued
/// tokens can be checked with the same pair they were signed with.
fn decoding_key_for_private(key: &PKey<Private>) -> BridgeResult<DecodingKey> {
    let pem = key
        .public_key_to_pem()
        .map_err(|e| BridgeError::Internal(format!("public half not derivable: {e}")))?;
    DecodingKey::from_rsa_pem(&pem)
        .map_err(|e| BridgeError::Internal(format!("public half not usable for RS256: {e}")))
}
