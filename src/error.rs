//! Error types shared across the crate.
//!
//! One public enum covers every failure class: validation of caller input,
//! structural parse failures on inbound bytes, protocol violations that are
//! fatal to a connection, per-command and per-connection timeouts, peer
//! rejections, and lost connections.

use thiserror::Error;

/// Crate-wide result alias.
pub type IecResult<T> = std::result::Result<T, IecError>;

/// IEC 60870-5 error type.
#[derive(Error, Debug)]
pub enum IecError {
    // --- validation -------------------------------------------------------

    /// Invalid system parameter or configuration field.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Common address 0 is reserved and never transmitted.
    #[error("common address {0} is not addressable")]
    CommonAddrInvalid(u16),

    /// The global (all-ones) common address is restricted to interrogation,
    /// counter interrogation, clock synchronization and reset process.
    #[error("global common address not allowed for type {0}")]
    GlobalAddrNotAllowed(u8),

    /// Information object address does not fit the configured octet width.
    #[error("information object address {0} exceeds the address width")]
    ObjAddrOutOfRange(u32),

    /// A command value lies outside its coded domain.
    #[error("value out of domain: {0}")]
    ValueOutOfDomain(&'static str),

    /// ASDU payload exceeds the 249 octet APDU capacity.
    #[error("payload of {0} octets exceeds the ASDU capacity")]
    PayloadTooLarge(usize),

    // --- structural parse -------------------------------------------------

    /// Type identifier 0 is reserved.
    #[error("reserved type identifier 0")]
    ReservedType,

    /// Type identifier outside the compatible range of this implementation.
    #[error("unknown type identifier {0}")]
    UnknownTypeId(u8),

    /// Cause of transmission code 0 or outside the defined table.
    #[error("illegal cause of transmission {0:#04x}")]
    IllegalCause(u8),

    /// Payload length inconsistent with the variable structure qualifier.
    #[error("payload length {got} does not match the structure ({expect} octets expected)")]
    LengthMismatch { expect: usize, got: usize },

    /// Sequence flag set on a type whose definition forbids it.
    #[error("sequence encoding not allowed for type {0}")]
    SeqOnIneligibleType(u8),

    /// The last implicit address of a sequence would exceed the address width.
    #[error("sequence address range overflows the information object address width")]
    SeqAddrOverflow,

    /// Malformed APDU frame (start octet, length octet or control field).
    #[error("frame format: {0}")]
    FrameFormat(String),

    // --- protocol (fatal to the connection) -------------------------------

    /// Inbound I-frame send sequence number differs from the expected one.
    #[error("sequence disruption: expected {expect}, got {got}")]
    SeqDisruption { expect: u16, got: u16 },

    /// Peer acknowledged a sequence number never sent.
    #[error("acknowledge {ack} beyond sent window")]
    AckBeyondSent { ack: u16 },

    /// U-frame with an undefined function code.
    #[error("unknown U-frame function {0:#04x}")]
    UnknownUFunction(u8),

    // --- timeouts ---------------------------------------------------------

    /// TCP connect did not complete within t0.
    #[error("connect timed out")]
    ConnectTimeout,

    /// A send awaiting acknowledgement expired (t1).
    #[error("acknowledge timed out")]
    AckTimeout,

    /// No activation confirmation before the activation timer expired.
    /// The command may or may not have launched.
    #[error("launch status unknown: no activation confirmation")]
    LaunchStatusUnknown,

    /// No activation termination before the termination timer expired.
    /// The command may or may not have completed.
    #[error("termination status unknown: no activation termination")]
    TerminationStatusUnknown,

    /// Select acknowledged but no matching execute arrived in time.
    #[error("select timed out awaiting execute")]
    SelectTimeout,

    // --- peer rejections --------------------------------------------------

    /// Peer confirmed the activation negatively.
    #[error("command denied by peer")]
    CommandDenied,

    /// Peer does not implement the type identifier.
    #[error("peer rejected: unknown type identification")]
    UnknownType,

    /// Peer does not accept the cause of transmission.
    #[error("peer rejected: unknown cause of transmission")]
    UnknownCause,

    /// Peer does not serve the common address.
    #[error("peer rejected: unknown common address")]
    UnknownCommonAddr,

    /// Peer does not know the information object address.
    #[error("peer rejected: unknown information object address")]
    UnknownInfoAddr,

    /// Response carried a cause that does not fit the exchange.
    #[error("response cause mismatch: {0:#04x}")]
    CauseMismatch(u8),

    // --- command lifecycle ------------------------------------------------

    /// Another command with the same fingerprint is still in flight.
    #[error("concurrent command in flight")]
    ConcurrentCommand,

    // --- connection -------------------------------------------------------

    /// Peer closed, or a transient failure was promoted to fatal.
    #[error("connection lost")]
    ConnectionLost,

    /// No connection is established.
    #[error("not connected")]
    NotConnected,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IecError {
    /// Whether the error ends the connection (protocol violations and
    /// connection-scoped timeouts), as opposed to a per-call failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IecError::SeqDisruption { .. }
                | IecError::AckBeyondSent { .. }
                | IecError::UnknownUFunction(_)
                | IecError::AckTimeout
                | IecError::ConnectTimeout
                | IecError::ConnectionLost
                | IecError::Io(_)
        )
    }
}
