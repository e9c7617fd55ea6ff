//! Session data model (Session Registry, C9) shared between the Admin
//! Server, which owns sessions, and anything that reads snapshots of them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of an administrative session.
///
/// Transitions move strictly forward through this list except for the
/// ACTIVE <-> EXCHANGING cycle that repeats for every APDU round-trip.
/// CLOSING, ERROR and TIMEOUT are terminal: a session in any of these
/// states emits no further APDUs.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    Active,
    Exchanging,
    Closing,
    Error,
    Timeout,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Error | Self::Timeout)
    }

    /// Whether a transition from `self` to `next` is permitted.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Handshaking) => true,
            (Handshaking, Active) => true,
            (Active, Exchanging) => true,
            (Exchanging, Active) => true,
            (Exchanging, Closing) => true,
            (Active, Closing) => true,
            // any non-terminal state can fault out
            (_, Error) | (_, Timeout) | (_, Closing) => true,
            _ => false,
        }
    }
}

/// Direction of a logged APDU exchange within a session.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ApduDirection {
    ToCard,
    FromCard,
}

/// A single logged APDU exchange, grounded in the dashboard's per-session
/// APDU log (kept here as the Session Registry's log even though the
/// dashboard surface itself is out of scope).
#[derive(Clone, PartialEq, Debug)]
pub struct ApduLogEntry {
    pub direction: ApduDirection,
    pub hex: String,
    pub sw: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// Identifiers parsed out of an `X-Admin-From` header, URI-shaped as
/// `//se/iccid/<digits>`, `//se/eid/<digits>`, `//terminal/imei/<digits>`,
/// or `//se/seid/<hex>`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct AdminFrom {
    pub iccid: Option<String>,
    pub eid: Option<String>,
    pub imei: Option<String>,
    pub seid: Option<String>,
}

/// Parse an `X-Admin-From` header value into whichever identifier it
/// carries. Unrecognized shapes parse to an all-`None` `AdminFrom` rather
/// than failing -- the header is advisory.
pub fn parse_admin_from(value: &str) -> AdminFrom {
    let mut out = AdminFrom::default();

    let trimmed = value.trim().trim_start_matches("//");
    let mut parts = trimmed.splitn(3, '/');
    let (scope, kind, id) = (parts.next(), parts.next(), parts.next());

    if let (Some(_scope), Some(kind), Some(id)) = (scope, kind, id) {
        let id = id.to_string();
        match kind {
            "iccid" => out.iccid = Some(id),
            "eid" => out.eid = Some(id),
            "imei" => out.imei = Some(id),
            "seid" => out.seid = Some(id),
            _ => {}
        }
    }

    out
}

/// Per-session counters, incremented by the Session Registry as APDUs and
/// errors flow through the session.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct SessionCounters {
    pub commands_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
}

/// Negotiated PSK-TLS connection info, attached to a session once its
/// handshake completes (spec.md section 4.6: "this info is attached to the
/// session"). Kept transport-agnostic (plain strings, not an OpenSSL type)
/// so this crate never needs to depend on a TLS binding.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TlsConnectionInfo {
    pub cipher_suite: String,
    pub protocol_version: String,
    pub handshake_duration_ms: u64,
}

/// A live administrative session. Owned exclusively by the Session
/// Registry; all other consumers see read-only snapshots (`Session` is
/// `Clone`, so a snapshot is just a clone taken under the registry's lock).
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub psk_identity: Option<String>,
    pub client_address: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub apdu_count: u64,
    pub pending_commands: std::collections::VecDeque<Vec<u8>>,
    pub counters: SessionCounters,
    pub admin_from: AdminFrom,
    pub log: Vec<ApduLogEntry>,
    pub tls_info: Option<TlsConnectionInfo>,
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    pub fn new(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            psk_identity: None,
            client_address: None,
            state: SessionState::Idle,
            created_at: now,
            updated_at: now,
            apdu_count: 0,
            pending_commands: Default::default(),
            counters: SessionCounters::default(),
            admin_from: AdminFrom::default(),
            log: Vec::new(),
            tls_info: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attempt a state transition, returning whether it was applied.
    pub fn transition(&mut self, next: SessionState, now: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = now;
        true
    }

    pub fn enqueue(&mut self, command: Vec<u8>) {
        self.pending_commands.push_back(command);
    }

    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        self.pending_commands.pop_front()
    }

    pub fn log_apdu(&mut self, direction: ApduDirection, hex: String, sw: Option<u16>, now: DateTime<Utc>) {
        self.apdu_count += 1;
        match direction {
            ApduDirection::ToCard => self.counters.commands_sent += 1,
            ApduDirection::FromCard => self.counters.responses_received += 1,
        }
        self.log.push(ApduLogEntry { direction, hex, sw, timestamp: now });
        self.updated_at = now;
    }
}
