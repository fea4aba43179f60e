use bytes::{BufMut, Bytes, BytesMut};

use super::message::{
    Arguments, Digest, ErrorValue, FloorRequestInformation, FloorRequestStatus,
    OverallRequestStatus, RequestStatusValue, UserInformation,
};
use super::types::{AttributeType, ErrorCode, Primitive, Priority};
use super::{COMMON_HEADER_LEN, MAX_ATTRIBUTE_LEN, VERSION, padded_len};
use crate::error::{BfcpError, BuildErrorKind, Result};

/// Encode `args` into a complete BFCP message.
///
/// Each primitive writes its attributes in the order RFC 4582 §5.3 lists
/// them. Required fields and non-empty lists are checked here; fields the
/// primitive does not carry are ignored. NONCE and DIGEST, when present,
/// are appended to any primitive.
pub fn build_message(args: &Arguments) -> Result<Bytes> {
    let mut w = MessageWriter::new();
    let primitive = args.primitive;

    match primitive {
        Primitive::FloorRequest => {
            if args.floor_ids.is_empty() {
                return Err(empty(primitive, "FLOOR-ID"));
            }
            for &floor_id in &args.floor_ids {
                w.floor_id(floor_id)?;
            }
            if let Some(beneficiary) = args.beneficiary_id {
                w.user_id(AttributeType::BeneficiaryId, beneficiary)?;
            }
            if let Some(info) = &args.participant_info {
                w.text(AttributeType::ParticipantProvidedInfo, info)?;
            }
            if let Some(priority) = args.priority {
                w.priority(priority)?;
            }
        }
        Primitive::FloorRelease | Primitive::FloorRequestQuery => {
            let id = args
                .floor_request_id
                .ok_or_else(|| missing(primitive, "FLOOR-REQUEST-ID"))?;
            w.u16_attribute(AttributeType::FloorRequestId, id)?;
        }
        Primitive::FloorRequestStatus | Primitive::ChairAction => {
            let info = args
                .floor_request_info
                .first()
                .ok_or_else(|| missing(primitive, "FLOOR-REQUEST-INFORMATION"))?;
            w.floor_request_information(info)?;
        }
        Primitive::UserQuery => {
            if let Some(beneficiary) = args.beneficiary_id {
                w.user_id(AttributeType::BeneficiaryId, beneficiary)?;
            }
        }
        Primitive::UserStatus => {
            if let Some(beneficiary) = &args.beneficiary {
                w.user_information(AttributeType::BeneficiaryInformation, beneficiary)?;
            }
            for info in &args.floor_request_info {
                w.floor_request_information(info)?;
            }
        }
        Primitive::FloorQuery => {
            for &floor_id in &args.floor_ids {
                w.floor_id(floor_id)?;
            }
        }
        Primitive::FloorStatus => {
            match args.floor_ids.as_slice() {
                [] => {}
                [floor_id] => w.floor_id(*floor_id)?,
                _ => return Err(BfcpError::build(BuildErrorKind::TooManyFloors)),
            }
            for info in &args.floor_request_info {
                w.floor_request_information(info)?;
            }
        }
        Primitive::HelloAck => {
            if args.supported_primitives.is_empty() {
                return Err(empty(primitive, "SUPPORTED-PRIMITIVES entry"));
            }
            if args.supported_attributes.is_empty() {
                return Err(empty(primitive, "SUPPORTED-ATTRIBUTES entry"));
            }
            w.supported_primitives(&args.supported_primitives)?;
            w.supported_attributes(&args.supported_attributes)?;
        }
        Primitive::Error => {
            let error = args
                .error
                .as_ref()
                .ok_or_else(|| missing(primitive, "ERROR-CODE"))?;
            w.error_code(error)?;
            if let Some(info) = &args.error_info {
                w.text(AttributeType::ErrorInfo, info)?;
            }
        }
        Primitive::ChairActionAck
        | Primitive::Hello
        | Primitive::FloorRequestStatusAck
        | Primitive::ErrorAck
        | Primitive::FloorStatusAck => {}
    }

    if let Some(nonce) = args.nonce {
        w.u16_attribute(AttributeType::Nonce, nonce)?;
    }
    if let Some(digest) = &args.digest {
        w.digest(digest)?;
    }

    let message = w.finish(args)?;
    tracing::trace!(
        primitive = %primitive,
        conference_id = args.entity.conference_id,
        transaction_id = args.entity.transaction_id,
        user_id = args.entity.user_id,
        len = message.len(),
        "built BFCP message"
    );
    Ok(message)
}

fn missing(primitive: Primitive, field: &'static str) -> BfcpError {
    BfcpError::build(BuildErrorKind::MissingField(primitive, field))
}

fn empty(primitive: Primitive, field: &'static str) -> BfcpError {
    BfcpError::build(BuildErrorKind::EmptyList(primitive, field))
}

/// Growing message buffer. The common header is reserved up front and
/// written by [`finish`](Self::finish) once the payload length is known.
struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    fn new() -> Self {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_bytes(0, COMMON_HEADER_LEN);
        Self { buf }
    }

    /// Reserve an attribute header and return its offset.
    fn begin(&mut self) -> usize {
        let start = self.buf.len();
        self.buf.put_u16(0);
        start
    }

    /// Backpatch the attribute header at `start` with the length written
    /// since [`begin`](Self::begin), then pad to a 4-octet boundary.
    ///
    /// Nested attributes are already padded when their parent ends, so a
    /// grouped length covers its children's padding but not its own.
    fn end(&mut self, start: usize, kind: AttributeType) -> Result<()> {
        let length = self.buf.len() - start;
        if length > MAX_ATTRIBUTE_LEN {
            return Err(BfcpError::build(BuildErrorKind::AttributeTooLong(kind)));
        }
        // Type (7 bits) | M (1 bit) | Length (8 bits). M is always set.
        let header = (u16::from(kind.code()) << 9) | (1 << 8) | length as u16;
        self.buf[start..start + 2].copy_from_slice(&header.to_be_bytes());
        let padding = padded_len(length) - length;
        self.buf.put_bytes(0, padding);
        Ok(())
    }

    fn u16_attribute(&mut self, kind: AttributeType, value: u16) -> Result<()> {
        let start = self.begin();
        self.buf.put_u16(value);
        self.end(start, kind)
    }

    fn floor_id(&mut self, floor_id: u16) -> Result<()> {
        if floor_id == 0 {
            return Err(BfcpError::build(BuildErrorKind::InvalidValue("floor id 0")));
        }
        self.u16_attribute(AttributeType::FloorId, floor_id)
    }

    fn user_id(&mut self, kind: AttributeType, user_id: u16) -> Result<()> {
        if user_id == 0 {
            return Err(BfcpError::build(BuildErrorKind::InvalidValue("user id 0")));
        }
        self.u16_attribute(kind, user_id)
    }

    fn priority(&mut self, priority: Priority) -> Result<()> {
        // Priority occupies the top three bits; the rest is reserved.
        self.u16_attribute(AttributeType::Priority, u16::from(priority.code()) << 13)
    }

    fn request_status(&mut self, value: RequestStatusValue) -> Result<()> {
        let start = self.begin();
        self.buf.put_u8(value.status.code());
        self.buf.put_u8(value.queue_position);
        self.end(start, AttributeType::RequestStatus)
    }

    fn error_code(&mut self, error: &ErrorValue) -> Result<()> {
        let start = self.begin();
        self.buf.put_u8(error.code.code());
        if error.code == ErrorCode::UnknownMandatoryAttribute {
            if error.unknown_attributes.is_empty() {
                return Err(empty(Primitive::Error, "unknown attribute in ERROR-CODE"));
            }
            for &kind in &error.unknown_attributes {
                // Attribute type in the top seven bits, R bit clear.
                self.buf.put_u8(kind << 1);
            }
        }
        self.end(start, AttributeType::ErrorCode)
    }

    fn text(&mut self, kind: AttributeType, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(BfcpError::build(BuildErrorKind::InvalidValue("empty text")));
        }
        let start = self.begin();
        self.buf.put_slice(text.as_bytes());
        self.end(start, kind)
    }

    fn supported_primitives(&mut self, primitives: &[Primitive]) -> Result<()> {
        let start = self.begin();
        for primitive in primitives {
            self.buf.put_u8(primitive.code());
        }
        self.end(start, AttributeType::SupportedPrimitives)
    }

    fn supported_attributes(&mut self, attributes: &[AttributeType]) -> Result<()> {
        let start = self.begin();
        for kind in attributes {
            self.buf.put_u8(kind.code() << 1);
        }
        self.end(start, AttributeType::SupportedAttributes)
    }

    fn digest(&mut self, digest: &Digest) -> Result<()> {
        let start = self.begin();
        self.buf.put_u8(digest.algorithm);
        self.buf.put_slice(digest.text.as_bytes());
        self.end(start, AttributeType::Digest)
    }

    fn user_information(&mut self, kind: AttributeType, info: &UserInformation) -> Result<()> {
        let start = self.begin();
        self.buf.put_u16(info.user_id);
        if let Some(name) = &info.display_name {
            self.text(AttributeType::UserDisplayName, name)?;
        }
        if let Some(uri) = &info.uri {
            self.text(AttributeType::UserUri, uri)?;
        }
        self.end(start, kind)
    }

    fn floor_request_status(&mut self, status: &FloorRequestStatus) -> Result<()> {
        let start = self.begin();
        self.buf.put_u16(status.floor_id);
        if let Some(value) = status.request_status {
            self.request_status(value)?;
        }
        if let Some(info) = &status.status_info {
            self.text(AttributeType::StatusInfo, info)?;
        }
        self.end(start, AttributeType::FloorRequestStatus)
    }

    fn overall_request_status(&mut self, status: &OverallRequestStatus) -> Result<()> {
        let start = self.begin();
        self.buf.put_u16(status.floor_request_id);
        if let Some(value) = status.request_status {
            self.request_status(value)?;
        }
        if let Some(info) = &status.status_info {
            self.text(AttributeType::StatusInfo, info)?;
        }
        self.end(start, AttributeType::OverallRequestStatus)
    }

    fn floor_request_information(&mut self, info: &FloorRequestInformation) -> Result<()> {
        if info.floor_statuses.is_empty() {
            return Err(empty(Primitive::FloorRequestStatus, "FLOOR-REQUEST-STATUS"));
        }
        let start = self.begin();
        self.buf.put_u16(info.floor_request_id);
        if let Some(overall) = &info.overall_status {
            self.overall_request_status(overall)?;
        }
        for status in &info.floor_statuses {
            self.floor_request_status(status)?;
        }
        if let Some(beneficiary) = &info.beneficiary {
            self.user_information(AttributeType::BeneficiaryInformation, beneficiary)?;
        }
        if let Some(requested_by) = &info.requested_by {
            self.user_information(AttributeType::RequestedByInformation, requested_by)?;
        }
        if let Some(priority) = info.priority {
            self.priority(priority)?;
        }
        if let Some(text) = &info.participant_info {
            self.text(AttributeType::ParticipantProvidedInfo, text)?;
        }
        self.end(start, AttributeType::FloorRequestInformation)
    }

    /// Write the common header and freeze the buffer.
    ///
    /// ```text
    /// ver(3) | reserved(5) | primitive(8) | payload length / 4 (16)
    /// ```
    fn finish(mut self, args: &Arguments) -> Result<Bytes> {
        let words = (self.buf.len() - COMMON_HEADER_LEN) / 4;
        let words = u16::try_from(words)
            .map_err(|_| BfcpError::build(BuildErrorKind::MessageTooLong))?;

        let mut header = [0u8; COMMON_HEADER_LEN];
        header[0] = VERSION << 5;
        header[1] = args.primitive.code();
        header[2..4].copy_from_slice(&words.to_be_bytes());
        header[4..8].copy_from_slice(&args.entity.conference_id.to_be_bytes());
        header[8..10].copy_from_slice(&args.entity.transaction_id.to_be_bytes());
        header[10..12].copy_from_slice(&args.entity.user_id.to_be_bytes());
        self.buf[..COMMON_HEADER_LEN].copy_from_slice(&header);

        Ok(self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Entity, RequestStatus, parse_message};

    fn entity() -> Entity {
        Entity::new(0x0102_0304, 0x0506, 0x0708)
    }

    #[test]
    fn hello_is_header_only() {
        let bytes = build_message(&Arguments::new(Primitive::Hello, entity())).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x20, 11, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn floor_request_layout() {
        let args = Arguments::new(Primitive::FloorRequest, entity())
            .with_floor(10)
            .with_priority(Priority::High);
        let bytes = build_message(&args).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[2..4], &[0, 2]);
        // FLOOR-ID: type 2, M set, length 4.
        assert_eq!(&bytes[12..16], &[0x05, 0x04, 0x00, 0x0a]);
        // PRIORITY: type 4, M set, length 4, priority 3 in the top bits.
        assert_eq!(&bytes[16..20], &[0x09, 0x04, 0x60, 0x00]);
    }

    #[test]
    fn text_attribute_is_padded() {
        let args = Arguments::new(Primitive::Error, entity())
            .with_error(ErrorValue::new(ErrorCode::UserDoesNotExist))
            .with_error_info("abc");
        let bytes = build_message(&args).unwrap();
        // ERROR-CODE: length 3, padded to 4.
        assert_eq!(&bytes[12..16], &[0x0d, 0x03, 0x02, 0x00]);
        // ERROR-INFO: length 5, padded to 8.
        assert_eq!(&bytes[16..24], &[0x0f, 0x05, b'a', b'b', b'c', 0, 0, 0]);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn grouped_length_covers_nested_padding() {
        let mut info = FloorRequestInformation::new(7);
        info.floor_statuses.push(FloorRequestStatus {
            floor_id: 1,
            request_status: Some(RequestStatusValue::new(RequestStatus::Granted, 0)),
            status_info: Some("x".into()),
        });
        let args =
            Arguments::new(Primitive::FloorRequestStatus, entity()).with_floor_request_info(info);
        let bytes = build_message(&args).unwrap();
        // FRS = 4 (id) + 4 (REQUEST-STATUS) + 4 (STATUS-INFO len 3 padded)
        assert_eq!(bytes[12] >> 1, AttributeType::FloorRequestInformation.code());
        assert_eq!(bytes[13], 4 + 12);
        assert_eq!(bytes[16] >> 1, AttributeType::FloorRequestStatus.code());
        assert_eq!(bytes[17], 12);
        assert_eq!(bytes.len(), 12 + 16);
    }

    #[test]
    fn unknown_mandatory_attribute_details() {
        let args = Arguments::new(Primitive::Error, entity())
            .with_error(ErrorValue::unknown_attributes(vec![30, 31]));
        let bytes = build_message(&args).unwrap();
        assert_eq!(&bytes[12..16], &[0x0d, 0x05, 0x04, 60]);
        assert_eq!(&bytes[16..17], &[62]);
    }

    #[test]
    fn floor_request_requires_floor() {
        let err = build_message(&Arguments::new(Primitive::FloorRequest, entity())).unwrap_err();
        assert!(matches!(
            err,
            BfcpError::Build {
                kind: BuildErrorKind::EmptyList(Primitive::FloorRequest, _)
            }
        ));
    }

    #[test]
    fn floor_status_single_floor() {
        let args = Arguments::new(Primitive::FloorStatus, entity()).with_floors(&[1, 2]);
        let err = build_message(&args).unwrap_err();
        assert!(matches!(
            err,
            BfcpError::Build {
                kind: BuildErrorKind::TooManyFloors
            }
        ));
    }

    #[test]
    fn hello_ack_requires_both_lists() {
        let args = Arguments::new(Primitive::HelloAck, entity())
            .with_supported(&Primitive::SUPPORTED, &[]);
        assert!(build_message(&args).is_err());
    }

    #[test]
    fn zero_floor_id_rejected() {
        let args = Arguments::new(Primitive::FloorQuery, entity()).with_floor(0);
        assert!(build_message(&args).is_err());
    }

    #[test]
    fn oversized_text_rejected() {
        let args = Arguments::new(Primitive::FloorRequest, entity())
            .with_floor(1)
            .with_participant_info("x".repeat(254));
        let err = build_message(&args).unwrap_err();
        assert!(matches!(
            err,
            BfcpError::Build {
                kind: BuildErrorKind::AttributeTooLong(AttributeType::ParticipantProvidedInfo)
            }
        ));
    }

    #[test]
    fn fields_outside_grammar_ignored() {
        let args = Arguments::new(Primitive::Hello, entity())
            .with_floor(3)
            .with_priority(Priority::Highest);
        assert_eq!(build_message(&args).unwrap().len(), COMMON_HEADER_LEN);
    }

    fn user(user_id: u16, name: Option<&str>, uri: Option<&str>) -> UserInformation {
        UserInformation {
            user_id,
            display_name: name.map(str::to_string),
            uri: uri.map(str::to_string),
        }
    }

    fn full_information(floor_request_id: u16) -> FloorRequestInformation {
        let mut info = FloorRequestInformation::new(floor_request_id);
        info.overall_status = Some(OverallRequestStatus {
            floor_request_id,
            request_status: Some(RequestStatusValue::new(RequestStatus::Accepted, 2)),
            status_info: Some("second in line".into()),
        });
        info.floor_statuses = vec![
            FloorRequestStatus {
                floor_id: 10,
                request_status: Some(RequestStatusValue::new(RequestStatus::Accepted, 0)),
                status_info: Some("ok".into()),
            },
            FloorRequestStatus::new(11),
        ];
        info.beneficiary = Some(user(5, Some("Alice"), Some("sip:alice@example.com")));
        info.requested_by = Some(user(9, Some("Chair"), None));
        info.priority = Some(Priority::High);
        info.participant_info = Some("slides".into());
        info
    }

    #[test]
    fn parse_recovers_built_arguments() {
        let cases = vec![
            Arguments::new(Primitive::FloorRequest, entity()).with_floor(3),
            Arguments::new(Primitive::FloorRequest, entity())
                .with_floors(&[3, 4])
                .with_beneficiary_id(5)
                .with_participant_info("please")
                .with_priority(Priority::Highest),
            Arguments::new(Primitive::FloorRelease, entity()).with_floor_request_id(7),
            Arguments::new(Primitive::FloorRequestQuery, entity()).with_floor_request_id(8),
            Arguments::new(Primitive::FloorRequestStatus, entity())
                .with_floor_request_info(full_information(7)),
            Arguments::new(Primitive::ChairAction, entity())
                .with_floor_request_info(full_information(8)),
            Arguments::new(Primitive::UserQuery, entity()),
            Arguments::new(Primitive::UserQuery, entity()).with_beneficiary_id(5),
            Arguments::new(Primitive::UserStatus, entity())
                .with_beneficiary(user(5, None, Some("sip:alice@example.com")))
                .with_floor_request_info(full_information(1))
                .with_floor_request_info(FloorRequestInformation {
                    floor_statuses: vec![FloorRequestStatus::new(12)],
                    ..FloorRequestInformation::new(2)
                }),
            Arguments::new(Primitive::FloorQuery, entity()),
            Arguments::new(Primitive::FloorQuery, entity()).with_floors(&[1, 2, 3]),
            Arguments::new(Primitive::FloorStatus, entity()),
            Arguments::new(Primitive::FloorStatus, entity())
                .with_floor(10)
                .with_floor_request_info(full_information(1))
                .with_floor_request_info(full_information(2)),
            Arguments::new(Primitive::ChairActionAck, entity()),
            Arguments::new(Primitive::Hello, entity()),
            Arguments::new(Primitive::HelloAck, entity())
                .with_supported(&Primitive::SUPPORTED, &AttributeType::ALL),
            Arguments::new(Primitive::Error, entity())
                .with_error(ErrorValue::new(ErrorCode::UserDoesNotExist))
                .with_error_info("User 5 does not exist in Conference 1"),
            Arguments::new(Primitive::Error, entity())
                .with_error(ErrorValue::unknown_attributes(vec![30, 100])),
            Arguments::new(Primitive::FloorRequestStatusAck, entity()),
            Arguments::new(Primitive::ErrorAck, entity()),
            Arguments::new(Primitive::FloorStatusAck, entity()),
            Arguments::new(Primitive::Hello, entity())
                .with_nonce(0xbeef)
                .with_digest(Digest {
                    algorithm: 1,
                    text: "d1g3st".into(),
                }),
        ];

        for args in cases {
            let bytes = build_message(&args).unwrap();
            let parsed = parse_message(&bytes).unwrap();
            assert!(parsed.errors.is_empty(), "{:?}: {:?}", args.primitive, parsed.errors);
            assert_eq!(parsed.arguments.as_ref(), Some(&args), "{:?}", args.primitive);
        }
    }

    #[test]
    fn trimmed_information_builds() {
        let mut info = full_information(1);
        info.participant_info = Some("x".repeat(200));
        assert!(!info.fits());

        let built = |info: &FloorRequestInformation| {
            build_message(
                &Arguments::new(Primitive::FloorRequestStatus, entity())
                    .with_floor_request_info(info.clone()),
            )
        };
        assert!(built(&info).is_err());

        assert!(info.trim_to_fit());
        assert_eq!(info.participant_info, None);
        assert_eq!(info.beneficiary.as_ref().unwrap().display_name.as_deref(), Some("Alice"));
        let bytes = built(&info).unwrap();
        assert_eq!(usize::from(bytes[13]), info.encoded_len());
    }
}
