//! BFCP wire codec (RFC 4582 §5).
//!
//! Every message starts with a 12-octet common header followed by a
//! sequence of TLV attributes, each padded to a 4-octet boundary:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Ver |Reserved |  Primitive    |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Conference ID                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Transaction ID        |            User ID            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type    |M|    Length     |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               |
//! |                   Attribute contents + padding                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Payload Length counts 4-octet words after the common header. An
//! attribute's Length counts its header and contents but not its padding.
//! Grouped attributes (`*-INFORMATION`, `*-REQUEST-STATUS`) carry a 16-bit
//! id followed by nested attributes.
//!
//! | Primitive            | Attributes                                          |
//! |----------------------|-----------------------------------------------------|
//! | FloorRequest         | 1*FLOOR-ID [BENEFICIARY-ID] [PARTICIPANT-PROVIDED-INFO] [PRIORITY] |
//! | FloorRelease         | FLOOR-REQUEST-ID                                    |
//! | FloorRequestQuery    | FLOOR-REQUEST-ID                                    |
//! | FloorRequestStatus   | FLOOR-REQUEST-INFORMATION                           |
//! | UserQuery            | [BENEFICIARY-ID]                                    |
//! | UserStatus           | [BENEFICIARY-INFORMATION] *FLOOR-REQUEST-INFORMATION |
//! | FloorQuery           | *FLOOR-ID                                           |
//! | FloorStatus          | [FLOOR-ID] *FLOOR-REQUEST-INFORMATION               |
//! | ChairAction          | FLOOR-REQUEST-INFORMATION                           |
//! | HelloAck             | SUPPORTED-PRIMITIVES SUPPORTED-ATTRIBUTES           |
//! | Error                | ERROR-CODE [ERROR-INFO]                             |
//! | Hello, ChairActionAck, acknowledgements | (none)                           |

mod build;
mod message;
mod parse;
mod types;

pub use build::build_message;
pub use message::{
    Arguments, Digest, ErrorValue, FloorRequestInformation, FloorRequestStatus,
    OverallRequestStatus, RequestStatusValue, UserInformation,
};
pub use parse::{ParseError, ReceivedAttribute, ReceivedMessage, parse_message};
pub use types::{
    AttributeType, Direction, Entity, ErrorCode, ParseErrorCode, Primitive, Priority,
    RequestStatus,
};

/// Protocol version written in and required of every message.
pub const VERSION: u8 = 1;

/// Size of the common header in octets.
pub const COMMON_HEADER_LEN: usize = 12;

/// Largest value of the 8-bit attribute Length field.
pub const MAX_ATTRIBUTE_LEN: usize = 255;

/// Round `len` up to the next multiple of 4.
pub(crate) fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(3), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }
}
