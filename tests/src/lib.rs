//! End-to-end scenarios exercising combinations of the GP OTA crates
//! together: Admin Server + Card Simulator over real PSK-TLS/TCP (e1, e2),
//! the APDU/TLV codecs (e3), the Modem Transport's URC fan-out (e4), the
//! Netsim Adapter's request correlation (e5), the Session Registry's
//! reaper (e6), and SCP02 MAC-chain monotonicity under randomized command
//! sequences (e7).

pub mod e1_minimal_gp_session;
pub mod e2_scp02_authenticate_and_put_key;
pub mod e3_tlv_round_trip;
pub mod e4_modem_urc_fan_out;
pub mod e5_netsim_response_correlation;
pub mod e6_session_reaper;
pub mod e7_mac_chain_monotonicity;
