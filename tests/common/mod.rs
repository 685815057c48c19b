//! Shared helpers for the integration suite: in-memory key material,
//! partner metadata, and a stub IRMA server.
#![allow(dead_code)]

use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use irma_saml_bridge::config::BridgeConfig;
use irma_saml_bridge::keys::KeyMaterial;
use irma_saml_bridge::services::{IrmaClient, ResponseBuilder, SessionTokenCodec, TrustStore};
use irma_saml_bridge::BridgeState;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use std::sync::Arc;

pub const SP_ENTITY_ID: &str = "https://sp.example.org";
pub const SP_ACS_URL: &str = "https://sp.example.org/acs";
pub const SP_REDIRECT_ACS_URL: &str = "https://sp.example.org/redirect-acs";
pub const DEFAULT_ATTRIBUTE: &str = "irma-demo.gemeente.personalData.fullname";

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn self_signed_cert(key: &PKey<Private>, common_name: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Metadata document for the test service provider, advertising its
/// certificate and both response endpoints.
pub fn sp_metadata(entity_id: &str, key: &PKey<Private>) -> String {
    let cert = self_signed_cert(key, "sp-test");
    let cert_b64 = BASE64.encode(cert.to_der().unwrap());
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{SP_REDIRECT_ACS_URL}" index="0"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#
    )
}

fn config_json(irma_service_host: &str) -> String {
    format!(
        r#"{{
            "host": "localhost:8080",
            "postfix": "/irma-saml-bridge",
            "issuer_name": "sidn-irma-saml-bridge",
            "jwt_private_key_path": "unused",
            "irma_public_key_path": "unused",
            "saml_certificate_path": "unused",
            "saml_private_key_path": "unused",
            "saml_metadata_path": "unused",
            "default_condiscon": [[["{DEFAULT_ATTRIBUTE}"]]],
            "default_map": {{
                "host": "irma.example.nl",
                "irma_service_host": "{irma_service_host}",
                "postfix": ""
            }},
            "https_used": false
        }}"#
    )
}

/// Build a fully in-memory bridge state: fresh keys, the given partner
/// metadata, and an IRMA backend at `irma_service_host`. Also returns
/// the private key matching the state's IRMA public key, for signing
/// simulated session results.
pub fn build_state(
    irma_service_host: &str,
    metadata_docs: &[String],
) -> (BridgeState, EncodingKey) {
    let config = BridgeConfig::from_bytes(config_json(irma_service_host).as_bytes()).unwrap();

    let bridge_key = rsa_key();
    let irma_key = rsa_key();
    let irma_signer =
        EncodingKey::from_rsa_pem(&irma_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    let cert = self_signed_cert(&bridge_key, "bridge-test");
    let keys = KeyMaterial::from_pems(
        &bridge_key.private_key_to_pem_pkcs8().unwrap(),
        &irma_key.public_key_to_pem().unwrap(),
        &bridge_key.private_key_to_pem_pkcs8().unwrap(),
        &cert.to_pem().unwrap(),
    )
    .unwrap();

    let trust_store = TrustStore::from_documents(metadata_docs.iter().map(String::as_str)).unwrap();

    let state = BridgeState {
        tokens: Arc::new(SessionTokenCodec::new(config.issuer_name())),
        responses: Arc::new(ResponseBuilder::new(
            config.issuer_name(),
            config.response_ttl_in_sec,
        )),
        keys: Arc::new(keys),
        trust_store: Arc::new(trust_store),
        irma: Arc::new(IrmaClient::new(reqwest::Client::new())),
        config: Arc::new(config),
    };
    (state, irma_signer)
}

/// Spawn a stub IRMA server answering every session-start call with a
/// fixed session pointer. Returns the `host:port` it listens on and the
/// body it serves.
pub async fn spawn_irma_stub() -> (String, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let host = format!("{}:{}", addr.ip(), addr.port());
    let body = format!(
        r#"{{"sessionPtr":{{"u":"http://{host}/irma/session/abc","irmaqr":"disclosing"}},"token":"abcdef123456"}}"#
    );

    let served = body.clone();
    let app = Router::new().route(
        "/session",
        post(move || {
            let body = served.clone();
            async move { body }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (host, body)
}

/// Sign arbitrary claims the way the IRMA server signs session results.
pub fn irma_result_jwt(key: &EncodingKey, claims: &serde_json::Value) -> String {
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, key).unwrap()
}
