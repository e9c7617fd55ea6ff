//! Ambient configuration structs for the Admin Server. The on-disk loader
//! (TOML parsing, environment overlay, CLI merge) is out of scope per
//! spec.md section 1; these are the plain structs a loader hands to
//! [`crate::admin::AdminServer::new`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// PSK-TLS cipher suites the profile allows, per spec.md section 4.6.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CipherSuite {
    PskAes128CbcSha256,
    PskAes256CbcSha384,
    PskAes128CbcSha,
    PskAes256CbcSha,
    /// Testing-only NULL-cipher suites; must be explicitly opted in.
    PskNullSha256,
    PskNullSha,
}

impl CipherSuite {
    /// OpenSSL cipher-list name for this suite.
    pub fn openssl_name(&self) -> &'static str {
        match self {
            Self::PskAes128CbcSha256 => "PSK-AES128-CBC-SHA256",
            Self::PskAes256CbcSha384 => "PSK-AES256-CBC-SHA384",
            Self::PskAes128CbcSha => "PSK-AES128-CBC-SHA",
            Self::PskAes256CbcSha => "PSK-AES256-CBC-SHA",
            Self::PskNullSha256 => "PSK-NULL-SHA256",
            Self::PskNullSha => "PSK-NULL-SHA",
        }
    }

    pub fn is_null_cipher(&self) -> bool {
        matches!(self, Self::PskNullSha256 | Self::PskNullSha)
    }

    /// The mandatory-and-recommended suite set, excluding the NULL ciphers
    /// that require an explicit opt-in.
    pub fn default_allowed() -> Vec<Self> {
        vec![Self::PskAes128CbcSha256, Self::PskAes256CbcSha384, Self::PskAes128CbcSha, Self::PskAes256CbcSha]
    }
}

/// Bind/behavior configuration for the Admin Server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminServerConfig {
    pub bind_address: String,
    pub admin_path: String,
    #[serde(with = "humantime_secs")]
    pub idle_timeout: Duration,
    pub allowed_ciphers: Vec<CipherSuite>,
    pub max_body_bytes: usize,
    #[serde(with = "humantime_secs")]
    pub handshake_timeout: Duration,
    /// Grace period the server waits after a stop signal before force
    /// closing still-active sessions (spec.md section 5 cancellation).
    #[serde(with = "humantime_secs")]
    pub shutdown_grace: Duration,
    /// Event Bus history capacity.
    pub event_history_capacity: usize,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            admin_path: "/admin".to_string(),
            idle_timeout: Duration::from_secs(300),
            allowed_ciphers: CipherSuite::default_allowed(),
            max_body_bytes: 1 << 20,
            handshake_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            event_history_capacity: 10_000,
        }
    }
}

mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
