#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

//! `vaultkit-core` manages the lifecycle of a hierarchical-deterministic Concordium identity and
//! the accounts derived from it.
//!
//! The [`VaultController`] is the entry point. It owns the [`StateHandle`] and sequences:
//!
//! - identity issuance and identity recovery against an external identity provider,
//! - credential deployment (account creation) and its on-chain finalization,
//! - account recovery by probing derivation indices after local data loss,
//! - simple transfers between derived accounts and other addresses.
//!
//! Cryptographic derivation and proof construction are provided by the host through
//! [`CryptoProvider`]; chain access through [`NodeConnector`] and [`NodeClient`].
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The Concordium network the controller talks to. Selects endpoints and timeouts.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(ascii_case_insensitive)]
pub enum Network {
    /// The public test network.
    #[default]
    Testnet,
    /// The production network.
    Mainnet,
}

mod error;
pub use error::*;

mod defaults;
pub use defaults::*;

mod best_effort;
pub use best_effort::*;

mod crypto;
pub use crypto::*;

mod node;
pub use node::*;

mod state;
pub use state::*;

mod poller;
pub use poller::*;

pub mod issuers;

mod controller;
pub use controller::*;

pub mod logger;

// private modules
mod http_request;

#[cfg(test)]
mod test_utils;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("vaultkit_core");
