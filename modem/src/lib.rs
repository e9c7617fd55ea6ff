//! AT command transport for cellular-modem-attached UICC cards: command
//! framing, response parsing, and unsolicited-result-code dispatch over an
//! already-open serial stream.
//!
//! Serial port enumeration and lifecycle management are out of scope here
//! (see [`port::SerialPortProvider`]) — this crate only needs something
//! that reads and writes bytes, which in tests is [`mock::MockModem`].

pub mod error;
pub mod interface;
pub mod mock;
pub mod port;
pub mod response;

pub use error::Error;
pub use interface::AtInterface;
pub use port::{PortInfo, SerialPortProvider};
pub use response::{AtResponse, AtResult};
