/// Errors produced by the Modem Transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("AT command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("AT command '{0}' returned ERROR")]
    CommandError(String),

    #[error("+CME ERROR: {code} ({command})")]
    CmeError { command: String, code: u32 },

    #[error("+CMS ERROR: {code} ({command})")]
    CmsError { command: String, code: u32 },

    #[error("serial port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port closed")]
    PortClosed,
}
