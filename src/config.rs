//! Bridge configuration, parsed from JSON
//!
//! Loaded once at startup from `CONFIG_PATH` (default `./config.json`) and
//! shared read-only between workers. Rotating configuration or partner
//! metadata requires a restart.

use crate::error::{BridgeError, BridgeResult};
use crate::saml::condiscon::Condiscon;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "./config.json";

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    360
}

/// A configuration stanza specifying where an IRMA server is reachable.
#[derive(Debug, Clone, Deserialize)]
pub struct IrmaPath {
    /// Hostname the user's browser talks to, e.g. `irma.example.nl`
    pub host: String,
    /// Hostname this daemon uses for the backend session-start call
    pub irma_service_host: String,
    /// Path after the hostname, e.g. `/v1`
    #[serde(default)]
    pub postfix: String,
}

/// Configuration for the IRMA SAML bridge daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Default host for this bridge, emitted in metadata and URLs
    pub host: String,

    /// Path prefix after the hostname, e.g. `/irma-saml-bridge`
    #[serde(default)]
    pub postfix: String,

    /// Issuer name for this SAML Identity Provider; falls back to `host`
    #[serde(default)]
    issuer_name: Option<String>,

    /// Path to the private key used to sign JWT messages
    pub jwt_private_key_path: String,

    /// Path to the public key of the IRMA server we talk to
    pub irma_public_key_path: String,

    /// Path to the certificate embedded in signed SAML responses
    pub saml_certificate_path: String,

    /// Path to the private key used to sign SAML responses
    pub saml_private_key_path: String,

    /// Path to the directory of partner metadata documents
    pub saml_metadata_path: String,

    /// Condiscon used when a service provider requests no attributes
    pub default_condiscon: Option<Condiscon>,

    /// IRMA location used when no per-SP mapping matches
    pub default_map: IrmaPath,

    /// Mapping from service-provider name to IRMA location
    #[serde(default)]
    pub irma_mapping: HashMap<String, IrmaPath>,

    #[serde(default = "default_true")]
    pub https_used: bool,

    /// How long incoming AuthnRequests stay usable, in seconds
    #[serde(default = "default_ttl")]
    pub request_ttl_in_sec: u64,

    /// How long our assertions stay usable, in seconds
    #[serde(default = "default_ttl")]
    pub response_ttl_in_sec: u64,
}

impl BridgeConfig {
    /// Load configuration from `CONFIG_PATH`, or the default path.
    pub fn load() -> BridgeResult<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let config = Self::from_path(&path)?;
        tracing::info!(path = %path, "loaded configuration");
        Ok(config)
    }

    /// Load and validate configuration from an explicit path.
    pub fn from_path(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            BridgeError::Internal(format!(
                "could not read configuration {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse and validate configuration from raw JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> BridgeResult<Self> {
        let config: BridgeConfig = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::Internal(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BridgeResult<()> {
        match &self.default_condiscon {
            None => Err(BridgeError::Internal(
                "no default_condiscon is specified".into(),
            )),
            Some(c) => c
                .validate()
                .map_err(|e| BridgeError::Internal(format!("invalid default_condiscon: {e}"))),
        }
    }

    /// The issuer name for this SAML Identity Provider.
    #[must_use]
    pub fn issuer_name(&self) -> &str {
        self.issuer_name.as_deref().unwrap_or(&self.host)
    }

    #[must_use]
    pub fn protocol(&self) -> &'static str {
        if self.https_used {
            "https://"
        } else {
            "http://"
        }
    }

    /// Absolute URL under this bridge's own host and prefix.
    #[must_use]
    pub fn construct_url(&self, path: &str) -> String {
        format!("{}{}{}{}", self.protocol(), self.host, self.postfix, path)
    }

    /// The validated default condiscon.
    ///
    /// `validate` ran at load time, so the value is always present.
    #[must_use]
    pub fn default_condiscon(&self) -> &Condiscon {
        self.default_condiscon
            .as_ref()
            .expect("configuration was validated at load time")
    }

    /// Resolve the IRMA location for a service provider, expanding the
    /// `{spName}` placeholder. Falls back to the generic mapping.
    #[must_use]
    pub fn resolve_irma_path(&self, sp_name: &str) -> ResolvedIrmaPath {
        let path = self.irma_mapping.get(sp_name).unwrap_or(&self.default_map);
        ResolvedIrmaPath {
            host: format!("{}{}", self.protocol(), path.host).replace("{spName}", sp_name),
            irma_service_host: format!("{}{}", self.protocol(), path.irma_service_host),
            postfix: path.postfix.replace("{spName}", sp_name),
        }
    }
}

/// An IRMA location with protocol prepended and placeholders expanded.
#[derive(Debug, Clone)]
pub struct ResolvedIrmaPath {
    pub host: String,
    pub irma_service_host: String,
    pub postfix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config_json() -> String {
        r#"{
            "host": "localhost:8080",
            "postfix": "/irma-saml-bridge",
            "issuer_name": "sidn-irma-saml-bridge",
            "jwt_private_key_path": "./dev-keys/jwt.der",
            "irma_public_key_path": "./dev-keys/irma-test.pub.der",
            "saml_certificate_path": "./dev-keys/idp.crt",
            "saml_private_key_path": "./dev-keys/idp.der",
            "saml_metadata_path": "./dev-keys/metadata",
            "default_condiscon": [[["irma-demo.gemeente.personalData.fullname"]]],
            "default_map": {
                "host": "irma-{spName}.example.nl",
                "irma_service_host": "irma-backend.internal",
                "postfix": "/{spName}"
            },
            "https_used": false
        }"#
        .to_string()
    }

    #[test]
    fn test_parse_sample_config() {
        let config = BridgeConfig::from_bytes(sample_config_json().as_bytes()).unwrap();
        assert_eq!(config.issuer_name(), "sidn-irma-saml-bridge");
        assert_eq!(config.protocol(), "http://");
        assert_eq!(config.request_ttl_in_sec, 360);
        assert_eq!(
            config.construct_url("/request"),
            "http://localhost:8080/irma-saml-bridge/request"
        );
    }

    #[test]
    fn test_issuer_name_falls_back_to_host() {
        let json = sample_config_json().replace(r#""issuer_name": "sidn-irma-saml-bridge","#, "");
        let config = BridgeConfig::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(config.issuer_name(), "localhost:8080");
    }

    #[test]
    fn test_missing_default_condiscon_rejected() {
        let json = sample_config_json().replace(
            r#""default_condiscon": [[["irma-demo.gemeente.personalData.fullname"]]],"#,
            "",
        );
        let err = BridgeConfig::from_bytes(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("default_condiscon"));
    }

    #[test]
    fn test_resolve_irma_path_expands_sp_name() {
        let config = BridgeConfig::from_bytes(sample_config_json().as_bytes()).unwrap();
        let resolved = config.resolve_irma_path("acme");
        assert_eq!(resolved.host, "http://irma-acme.example.nl");
        assert_eq!(resolved.irma_service_host, "http://irma-backend.internal");
        assert_eq!(resolved.postfix, "/acme");
    }
}
