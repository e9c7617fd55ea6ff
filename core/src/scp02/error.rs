/// Errors produced by the SCP02 secure channel engine.
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    /// INITIALIZE UPDATE response was not exactly 28 bytes.
    #[error("malformed INITIALIZE UPDATE response (expected 28 bytes, got {0})")]
    MalformedResponse(usize),

    /// Card cryptogram or EXTERNAL AUTHENTICATE status word did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// An operation requiring an open channel was attempted in another state.
    #[error("channel not open")]
    ChannelNotOpen,

    /// `wrap_apdu` was given a command whose data, once padded and MACed,
    /// would exceed the extended-length ceiling.
    #[error("command too large to secure")]
    CommandTooLarge,
}
