//! Admin Server: PSK-TLS listener (C6 server role), the GP Amendment B
//! Admin HTTP state machine (C7), and the Session Registry (C9).
//!
//! This crate links `gp-ota-core` for the shared Session/Event model, the
//! SCP02 engine, and the Script Engine, but owns none of the card-side
//! logic (that's `gp-ota-sim`) and none of the APDU/TLV wire format (that's
//! `gp-ota-apdu`).

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod psk;
pub mod registry;

pub use admin::AdminServer;
pub use config::{AdminServerConfig, CipherSuite};
pub use error::Error;
pub use psk::{InMemoryPskStore, PskKeyStore};
pub use registry::SessionRegistry;
