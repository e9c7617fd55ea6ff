use core::fmt;

/// Coarse classification of a status word, used to decide whether an
/// R-APDU carries application data or signals an error condition.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StatusKind {
    /// `9000` — normal processing, no further qualification.
    Success,
    /// `61xx` — normal processing, `xx` bytes available via GET RESPONSE.
    MoreDataAvailable(u8),
    /// `63Cx` — verification failed, `x` retries remaining.
    VerificationFailed(u8),
    /// `6Cxx` — wrong `Le`, `xx` is the correct length.
    WrongLe(u8),
    /// `69xx`, `67xx`, `6Axx`, `6Dxx`, `6Exx` and friends — card-level error.
    Error,
    /// Anything else the table above does not classify.
    Unknown,
}

/// A two-byte ISO 7816-4 status word (`SW1 || SW2`).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const OK: StatusWord = StatusWord(0x9000);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord(0x6D00);
    pub const CLA_NOT_SUPPORTED: StatusWord = StatusWord(0x6E00);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6A82);
    pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord(0x6982);
    pub const AUTHENTICATION_FAILED: StatusWord = StatusWord(0x6300);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self(((sw1 as u16) << 8) | sw2 as u16)
    }

    pub const fn sw1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn sw2(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn is_success(&self) -> bool {
        self.0 == 0x9000
    }

    pub fn kind(&self) -> StatusKind {
        match self.sw1() {
            0x90 if self.sw2() == 0x00 => StatusKind::Success,
            0x61 => StatusKind::MoreDataAvailable(self.sw2()),
            0x63 if self.sw2() & 0xf0 == 0xc0 => StatusKind::VerificationFailed(self.sw2() & 0x0f),
            0x6c => StatusKind::WrongLe(self.sw2()),
            0x62 | 0x63 | 0x64 | 0x65 | 0x67 | 0x68 | 0x69 | 0x6a | 0x6b | 0x6d | 0x6e | 0x6f => {
                StatusKind::Error
            }
            _ => StatusKind::Unknown,
        }
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SW({:04X})", self.0)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u16> for StatusWord {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl From<StatusWord> for u16 {
    fn from(v: StatusWord) -> Self {
        v.0
    }
}
