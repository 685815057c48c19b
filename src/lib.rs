//! A stateless SAML 2.0 Identity Provider that bridges authentication to
//! IRMA attribute disclosure.
//!
//! Service providers send a signed AuthnRequest over the HTTP-Redirect
//! binding; the bridge starts an IRMA disclosure session and, once the
//! user disclosed the requested attributes, answers with a signed SAML
//! response. All session state travels through the browser as signed
//! JWTs, so any number of replicas can serve any step of a session.

pub mod config;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod models;
pub mod router;
pub mod saml;
pub mod services;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use handlers::BridgeState;
pub use router::router;
