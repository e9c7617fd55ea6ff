//! ISO 7816-4 APDU codec and ASN.1 BER-TLV codec.
//!
//! This crate is deliberately free of I/O and async: it is the wire-format
//! layer consumed by the SCP02 engine, the Admin HTTP state machine, and the
//! Virtual UICC to agree on the same byte-exact encoding of commands and
//! responses.
//!
//! Encodings follow ISO 7816-4 (APDU cases 1-4, short and extended length
//! forms) and ASN.1 BER (definite-length TLV, including two-byte tags and
//! the `0x81`/`0x82`/`0x83` long length forms).

pub mod capdu;
pub mod error;
pub mod ins;
pub mod sw;
pub mod tlv;

pub use capdu::{CommandApdu, ResponseApdu};
pub use error::Error;
pub use ins::Instruction;
pub use sw::{StatusKind, StatusWord};
pub use tlv::TlvNode;
