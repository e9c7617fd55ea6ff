//! JSON-RPC 2.0 client for network-simulator (cellular callbox) integration
//! (C10): request/response correlation by id over WebSocket or
//! newline-delimited TCP, notification fan-out, and an exponential-backoff
//! reconnect manager.
//!
//! This crate has no knowledge of APDUs or sessions -- it is a thin,
//! reusable JSON-RPC transport that the Admin Server's provisioning glue
//! and the test harness both drive the same way.

pub mod client;
pub mod error;
pub mod message;
pub mod reconnect;
pub mod transport;

pub use client::{NetsimClient, NotificationHandler, ReconnectEvent, ReconnectHandler};
pub use error::Error;
pub use reconnect::{Backoff, BackoffConfig};
