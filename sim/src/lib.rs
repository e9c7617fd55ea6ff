//! Card Simulator: the Virtual UICC dispatcher (C8) plus the client-role
//! halves of the PSK-TLS transport (C6) and the Admin HTTP state machine
//! (C7).
//!
//! This crate links `gp-ota-server` only for its PSK-TLS client-context
//! helpers (`gp_ota_server::psk`) -- it owns none of the Admin Server's
//! session registry or server-side HTTP framing, which stay in that crate.

pub mod client;
pub mod error;
pub mod http_client;
pub mod uicc;

pub use client::{connect_and_run, run_session, CardSimulatorConfig};
pub use error::Error;
pub use uicc::{AppletEntry, FaultInjector, InjectedFault, Profile, VirtualUicc};
