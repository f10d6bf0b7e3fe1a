//! Identity providers: their configuration and the redirect-based issuance/recovery handshake.

mod config;
mod identity_provider;

pub use config::*;
pub(crate) use identity_provider::IdentityProviderClient;
pub use identity_provider::CODE_URI_MARKER;
