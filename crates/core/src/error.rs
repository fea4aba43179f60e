//! Error types for the BFCP library.

use std::fmt;

use crate::protocol::{AttributeType, Primitive};

/// Errors that can occur in the BFCP library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Codec**: [`Parse`](Self::Parse) and [`Build`](Self::Build).
/// - **Transport**: [`Io`](Self::Io) for socket/network failures.
/// - **Registries**: conference, floor and user lookups or capacity limits.
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning).
///
/// Protocol-level refusals (unknown conference in a FloorRequest, rate
/// limit reached, ...) are not errors of this type. They are answered with
/// an Error message to the peer.
#[derive(Debug, thiserror::Error)]
pub enum BfcpError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A received message could not be turned into arguments.
    #[error("BFCP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The arguments do not satisfy the grammar of their primitive.
    #[error("BFCP build error: {kind}")]
    Build { kind: BuildErrorKind },

    #[error("conference not found: {0}")]
    ConferenceNotFound(u32),

    #[error("conference already exists: {0}")]
    ConferenceExists(u32),

    /// The server already holds `max_conferences` conferences.
    #[error("conference limit reached ({0})")]
    ConferenceLimitReached(usize),

    #[error("floor not found: {0}")]
    FloorNotFound(u16),

    #[error("floor already exists: {0}")]
    FloorExists(u16),

    /// The floor registry already holds `max_floors` floors.
    #[error("floor registry full ({0} floors)")]
    FloorRegistryFull(usize),

    #[error("user not found: {0}")]
    UserNotFound(u16),

    #[error("user already exists: {0}")]
    UserExists(u16),

    /// An identifier or limit was zero or otherwise out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of parse failure that invalidates a whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// An attribute that may only appear nested inside a grouped
    /// attribute was found at the top level of the message.
    MisplacedAttribute(AttributeType),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MisplacedAttribute(kind) => {
                write!(f, "{kind} is not allowed at message level")
            }
        }
    }
}

/// Specific kind of build failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// A field the primitive requires was not set.
    MissingField(Primitive, &'static str),
    /// A list the primitive requires to be non-empty was empty.
    EmptyList(Primitive, &'static str),
    /// FloorStatus carries at most one FLOOR-ID.
    TooManyFloors,
    /// A value cannot be encoded (zero floor id, empty text, ...).
    InvalidValue(&'static str),
    /// An attribute would exceed the 255-octet length field.
    AttributeTooLong(AttributeType),
    /// The payload would exceed the 16-bit length field of the header.
    MessageTooLong,
}

impl fmt::Display for BuildErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(primitive, field) => {
                write!(f, "{primitive} requires {field}")
            }
            Self::EmptyList(primitive, field) => {
                write!(f, "{primitive} requires at least one {field}")
            }
            Self::TooManyFloors => write!(f, "FloorStatus carries at most one FLOOR-ID"),
            Self::InvalidValue(what) => write!(f, "invalid value: {what}"),
            Self::AttributeTooLong(kind) => write!(f, "{kind} exceeds 255 octets"),
            Self::MessageTooLong => write!(f, "message payload exceeds the length field"),
        }
    }
}

impl BfcpError {
    pub(crate) fn build(kind: BuildErrorKind) -> Self {
        Self::Build { kind }
    }
}

/// Convenience alias for `Result<T, BfcpError>`.
pub type Result<T> = std::result::Result<T, BfcpError>;
