//! Protocol and security services

pub mod binding;
pub mod irma_client;
pub mod metadata;
pub mod response_builder;
pub mod session_token;
pub mod trust_store;

pub use irma_client::IrmaClient;
pub use response_builder::ResponseBuilder;
pub use session_token::SessionTokenCodec;
pub use trust_store::TrustStore;
