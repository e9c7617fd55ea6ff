//! Protocol engine for GlobalPlatform Amendment B / ETSI TS 102.226 OTA
//! administration: the SCP02 secure channel, the Script Engine, the shared
//! Session/Event data model, and the in-process Event Bus.
//!
//! This crate has no knowledge of transports (PSK-TLS, HTTP, modem, netsim
//! all live in sibling crates) and no knowledge of card-side applet
//! behavior (the Virtual UICC lives in `gp-ota-sim`). It is the part of the
//! system that both the Admin Server and the Card Simulator link against to
//! agree on secure-channel and scripting semantics.

pub mod event;
pub mod scp02;
pub mod script;
pub mod session;

pub use event::{Event, EventBus, EventKind};
pub use script::{
    CommandQueue, LoadReport, ParamSpec, ParamType, ParamValue, Script, ScriptCommand, ScriptRepository,
    ScriptStore, Template,
};
pub use session::{
    parse_admin_from, AdminFrom, ApduDirection, ApduLogEntry, Session, SessionCounters, SessionState,
    TlsConnectionInfo,
};
