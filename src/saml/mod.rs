//! SAML protocol types and the condiscon policy layer

pub mod authn_request;
pub mod condiscon;
pub mod disclosure;
pub mod policy;

pub use authn_request::AuthnRequest;
pub use condiscon::Condiscon;
pub use disclosure::Disclosure;

/// Escape a string for use in XML content or attribute values.
#[must_use]
pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
