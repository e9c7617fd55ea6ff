use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error;

/// Metadata about a discoverable serial device.
///
/// Enumeration and lifecycle are delegated to whatever platform collaborator
/// implements [`SerialPortProvider`]; this crate only ever touches an
/// already-open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    pub description: Option<String>,
    pub usb_vid: Option<u16>,
    pub usb_pid: Option<u16>,
    pub manufacturer: Option<String>,
}

/// Capability contract for discovering and opening serial devices.
///
/// A real implementation (not provided by this crate) wraps a platform
/// serial-enumeration library; tests use [`crate::mock::MockSerialPort`]
/// directly instead of going through this trait.
#[async_trait]
pub trait SerialPortProvider: Send + Sync {
    type Port: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn list_ports(&self) -> Result<Vec<PortInfo>, Error>;

    async fn open(&self, path: &str, baud: u32, timeout: Duration) -> Result<Self::Port, Error>;
}
