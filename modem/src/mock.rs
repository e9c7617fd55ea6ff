//! An in-memory serial port for tests, backed by [`tokio::io::duplex`].
//!
//! `MockSerialPort::new` returns the half handed to [`crate::AtInterface`]
//! plus a [`MockModem`] handle the test drives as if it were the far end of
//! the wire: writing bytes makes them show up as "modem output", and reading
//! captures whatever the interface sent as AT commands.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// The interface-facing half of the mock link.
pub type MockPort = DuplexStream;

/// The test-facing half of the mock link, standing in for the modem itself.
pub struct MockModem {
    stream: DuplexStream,
}

impl MockModem {
    /// Creates a connected pair: `(interface side, modem side)`.
    pub fn pair(buffer: usize) -> (MockPort, MockModem) {
        let (a, b) = tokio::io::duplex(buffer);
        (a, MockModem { stream: b })
    }

    /// Sends raw bytes to the interface, as if the modem produced them.
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("mock modem write");
    }

    /// Sends an AT response line, appending the `\r\n` terminator.
    pub async fn send_line(&mut self, line: &str) {
        self.send(line.as_bytes()).await;
        self.send(b"\r\n").await;
    }

    /// Reads up to `len` bytes of whatever the interface wrote (an AT
    /// command line, typically). Blocks until at least one byte arrives.
    pub async fn recv(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        let n = self.stream.read(&mut buf).await.expect("mock modem read");
        buf.truncate(n);
        buf
    }
}
