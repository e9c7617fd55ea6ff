/// Errors produced by the APDU / TLV codec.
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    /// Encoded or source bytes are too short to contain a valid structure.
    #[error("invalid length")]
    InvalidLength,

    /// A C-APDU's length fields are inconsistent with the total buffer length.
    #[error("malformed command")]
    MalformedCommand,

    /// Command or TLV data exceeds the 65535-byte extended-length ceiling.
    #[error("length out of range")]
    LengthOutOfRange,

    /// An R-APDU was shorter than the mandatory 2-byte status word.
    #[error("response too short for status word")]
    TruncatedResponse,

    /// A TLV length field used a reserved or unsupported form.
    #[error("invalid TLV length encoding")]
    InvalidTlvLength,
}
