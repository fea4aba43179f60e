//! Fixed BFCP code points (RFC 4582 §5).
//!
//! Every enumeration here is load-bearing for interoperability: the
//! discriminants are the values written on the wire.

use std::fmt;

/// BFCP message type, carried in the second octet of the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Primitive {
    FloorRequest = 1,
    FloorRelease = 2,
    FloorRequestQuery = 3,
    FloorRequestStatus = 4,
    UserQuery = 5,
    UserStatus = 6,
    FloorQuery = 7,
    FloorStatus = 8,
    ChairAction = 9,
    ChairActionAck = 10,
    Hello = 11,
    HelloAck = 12,
    Error = 13,
    FloorRequestStatusAck = 14,
    ErrorAck = 15,
    FloorStatusAck = 16,
}

impl Primitive {
    /// Primitives a server advertises in HelloAck.
    pub const SUPPORTED: [Primitive; 13] = [
        Self::FloorRequest,
        Self::FloorRelease,
        Self::FloorRequestQuery,
        Self::FloorRequestStatus,
        Self::UserQuery,
        Self::UserStatus,
        Self::FloorQuery,
        Self::FloorStatus,
        Self::ChairAction,
        Self::ChairActionAck,
        Self::Hello,
        Self::HelloAck,
        Self::Error,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::FloorRequest,
            2 => Self::FloorRelease,
            3 => Self::FloorRequestQuery,
            4 => Self::FloorRequestStatus,
            5 => Self::UserQuery,
            6 => Self::UserStatus,
            7 => Self::FloorQuery,
            8 => Self::FloorStatus,
            9 => Self::ChairAction,
            10 => Self::ChairActionAck,
            11 => Self::Hello,
            12 => Self::HelloAck,
            13 => Self::Error,
            14 => Self::FloorRequestStatusAck,
            15 => Self::ErrorAck,
            16 => Self::FloorStatusAck,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Acknowledgements carry no attributes and need no answer.
    pub fn is_ack(self) -> bool {
        matches!(
            self,
            Self::FloorRequestStatusAck | Self::ErrorAck | Self::FloorStatusAck
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Attribute type, the upper seven bits of an attribute header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    BeneficiaryId = 1,
    FloorId = 2,
    FloorRequestId = 3,
    Priority = 4,
    RequestStatus = 5,
    ErrorCode = 6,
    ErrorInfo = 7,
    ParticipantProvidedInfo = 8,
    StatusInfo = 9,
    SupportedAttributes = 10,
    SupportedPrimitives = 11,
    UserDisplayName = 12,
    UserUri = 13,
    BeneficiaryInformation = 14,
    FloorRequestInformation = 15,
    RequestedByInformation = 16,
    FloorRequestStatus = 17,
    OverallRequestStatus = 18,
    Nonce = 19,
    Digest = 20,
}

impl AttributeType {
    /// Attributes a server advertises in HelloAck.
    pub const ALL: [AttributeType; 20] = [
        Self::BeneficiaryId,
        Self::FloorId,
        Self::FloorRequestId,
        Self::Priority,
        Self::RequestStatus,
        Self::ErrorCode,
        Self::ErrorInfo,
        Self::ParticipantProvidedInfo,
        Self::StatusInfo,
        Self::SupportedAttributes,
        Self::SupportedPrimitives,
        Self::UserDisplayName,
        Self::UserUri,
        Self::BeneficiaryInformation,
        Self::FloorRequestInformation,
        Self::RequestedByInformation,
        Self::FloorRequestStatus,
        Self::OverallRequestStatus,
        Self::Nonce,
        Self::Digest,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code).checked_sub(1)?).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Attributes that only ever appear inside a grouped attribute.
    pub fn is_nested_only(self) -> bool {
        matches!(
            self,
            Self::UserDisplayName
                | Self::UserUri
                | Self::RequestedByInformation
                | Self::FloorRequestStatus
                | Self::OverallRequestStatus
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeneficiaryId => "BENEFICIARY-ID",
            Self::FloorId => "FLOOR-ID",
            Self::FloorRequestId => "FLOOR-REQUEST-ID",
            Self::Priority => "PRIORITY",
            Self::RequestStatus => "REQUEST-STATUS",
            Self::ErrorCode => "ERROR-CODE",
            Self::ErrorInfo => "ERROR-INFO",
            Self::ParticipantProvidedInfo => "PARTICIPANT-PROVIDED-INFO",
            Self::StatusInfo => "STATUS-INFO",
            Self::SupportedAttributes => "SUPPORTED-ATTRIBUTES",
            Self::SupportedPrimitives => "SUPPORTED-PRIMITIVES",
            Self::UserDisplayName => "USER-DISPLAY-NAME",
            Self::UserUri => "USER-URI",
            Self::BeneficiaryInformation => "BENEFICIARY-INFORMATION",
            Self::FloorRequestInformation => "FLOOR-REQUEST-INFORMATION",
            Self::RequestedByInformation => "REQUESTED-BY-INFORMATION",
            Self::FloorRequestStatus => "FLOOR-REQUEST-STATUS",
            Self::OverallRequestStatus => "OVERALL-REQUEST-STATUS",
            Self::Nonce => "NONCE",
            Self::Digest => "DIGEST",
        };
        f.write_str(name)
    }
}

/// State of a floor request as reported in REQUEST-STATUS.
///
/// The first three are live queue states; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RequestStatus {
    Pending = 1,
    Accepted = 2,
    Granted = 3,
    Denied = 4,
    Cancelled = 5,
    Released = 6,
    Revoked = 7,
}

impl RequestStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Pending,
            2 => Self::Accepted,
            3 => Self::Granted,
            4 => Self::Denied,
            5 => Self::Cancelled,
            6 => Self::Released,
            7 => Self::Revoked,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        self > Self::Granted
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Floor request priority, 0 (lowest) to 4 (highest).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Lowest = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Highest = 4,
}

impl Priority {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Lowest,
            1 => Self::Low,
            2 => Self::Normal,
            3 => Self::High,
            4 => Self::Highest,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Error codes carried in ERROR-CODE (RFC 4582 §5.2.6, RFC 8855 §5.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    ConferenceDoesNotExist = 1,
    UserDoesNotExist = 2,
    UnknownPrimitive = 3,
    UnknownMandatoryAttribute = 4,
    UnauthorizedOperation = 5,
    InvalidFloorId = 6,
    FloorRequestIdDoesNotExist = 7,
    MaxFloorRequestsReached = 8,
    UseTls = 9,
    ParseError = 10,
    UseDtls = 11,
    UnsupportedVersion = 12,
}

impl ErrorCode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::ConferenceDoesNotExist,
            2 => Self::UserDoesNotExist,
            3 => Self::UnknownPrimitive,
            4 => Self::UnknownMandatoryAttribute,
            5 => Self::UnauthorizedOperation,
            6 => Self::InvalidFloorId,
            7 => Self::FloorRequestIdDoesNotExist,
            8 => Self::MaxFloorRequestsReached,
            9 => Self::UseTls,
            10 => Self::ParseError,
            11 => Self::UseDtls,
            12 => Self::UnsupportedVersion,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Problems recorded while parsing a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParseErrorCode {
    WrongVersion = 1,
    ReservedNotZero = 2,
    UnknownPrimitive = 3,
    UnknownAttribute = 4,
    WrongLength = 5,
    ParsingError = 6,
}

impl ParseErrorCode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::WrongVersion,
            2 => Self::ReservedNotZero,
            3 => Self::UnknownPrimitive,
            4 => Self::UnknownAttribute,
            5 => Self::WrongLength,
            6 => Self::ParsingError,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Identifies the context of every BFCP message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Entity {
    pub conference_id: u32,
    pub transaction_id: u16,
    pub user_id: u16,
}

impl Entity {
    pub fn new(conference_id: u32, transaction_id: u16, user_id: u16) -> Self {
        Self {
            conference_id,
            transaction_id,
            user_id,
        }
    }
}

/// Whether a message was received from or sent to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_codes_match_rfc() {
        assert_eq!(Primitive::FloorRequest.code(), 1);
        assert_eq!(Primitive::Error.code(), 13);
        assert_eq!(Primitive::from_code(9), Some(Primitive::ChairAction));
        assert_eq!(Primitive::from_code(0), None);
        assert_eq!(Primitive::from_code(17), None);
    }

    #[test]
    fn attribute_codes_round_trip() {
        for kind in AttributeType::ALL {
            assert_eq!(AttributeType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(AttributeType::from_code(0), None);
        assert_eq!(AttributeType::from_code(21), None);
    }

    #[test]
    fn nested_only_attributes() {
        assert!(AttributeType::UserUri.is_nested_only());
        assert!(AttributeType::OverallRequestStatus.is_nested_only());
        assert!(!AttributeType::BeneficiaryInformation.is_nested_only());
        assert!(!AttributeType::FloorRequestInformation.is_nested_only());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RequestStatus::Granted.is_terminal());
        assert!(RequestStatus::Denied.is_terminal());
        assert!(RequestStatus::Revoked.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Highest > Priority::Normal);
        assert_eq!(Priority::from_code(5), None);
        assert_eq!(Priority::default(), Priority::Lowest);
    }
}
