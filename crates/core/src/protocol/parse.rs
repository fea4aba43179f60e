use bytes::Buf;

use super::message::{
    Arguments, Digest, ErrorValue, FloorRequestInformation, FloorRequestStatus,
    OverallRequestStatus, RequestStatusValue, UserInformation,
};
use super::types::{
    AttributeType, Entity, ErrorCode, ParseErrorCode, Primitive, Priority, RequestStatus,
};
use super::{COMMON_HEADER_LEN, VERSION, padded_len};
use crate::error::{BfcpError, ParseErrorKind, Result};

/// One attribute header found while scanning a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAttribute {
    /// Offset of the attribute header within the scanned buffer.
    pub position: usize,
    pub kind: u8,
    pub mandatory: bool,
    pub length: u8,
    pub valid: bool,
}

/// A problem recorded while parsing. `attribute` is 0 for header errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub attribute: u8,
    pub mandatory: bool,
    pub code: ParseErrorCode,
}

impl ParseError {
    fn header(code: ParseErrorCode) -> Self {
        Self {
            attribute: 0,
            mandatory: false,
            code,
        }
    }

    fn attribute(attr: &ReceivedAttribute, code: ParseErrorCode) -> Self {
        Self {
            attribute: attr.kind,
            mandatory: attr.mandatory,
            code,
        }
    }
}

/// Result of [`parse_message`].
///
/// `entity` and `arguments` are `None` when the common header was
/// rejected; `arguments` is also `None` for an unknown primitive.
#[derive(Debug, Clone, Default)]
pub struct ReceivedMessage {
    pub version: u8,
    pub reserved: u8,
    pub primitive: u8,
    pub payload_length: u16,
    pub entity: Option<Entity>,
    pub attributes: Vec<ReceivedAttribute>,
    pub errors: Vec<ParseError>,
    pub arguments: Option<Arguments>,
}

impl ReceivedMessage {
    /// True when the common header was rejected and nothing else was read.
    pub fn has_header_errors(&self) -> bool {
        self.entity.is_none()
    }

    /// Types of unknown attributes that had the mandatory bit set.
    pub fn unknown_mandatory(&self) -> Vec<u8> {
        self.errors
            .iter()
            .filter(|e| e.code == ParseErrorCode::UnknownAttribute && e.mandatory)
            .map(|e| e.attribute)
            .collect()
    }

    /// Errors other than unknown attributes, which a receiver may ignore
    /// when their mandatory bit is clear.
    pub fn attribute_errors(&self) -> impl Iterator<Item = &ParseError> {
        self.errors
            .iter()
            .filter(|e| e.code != ParseErrorCode::UnknownAttribute)
    }
}

/// Decode a received BFCP message.
///
/// Header problems are fatal and reported through
/// [`ReceivedMessage::errors`] with no entity. Attribute problems are
/// recorded and the attribute skipped; the rest of the message stays
/// usable. The only hard error is an attribute that is only legal inside a
/// grouped attribute appearing at message level.
pub fn parse_message(buf: &[u8]) -> Result<ReceivedMessage> {
    let mut message = ReceivedMessage::default();

    if buf.len() >= 4 {
        let mut header = buf;
        let first = header.get_u8();
        message.version = first >> 5;
        message.reserved = first & 0x1f;
        message.primitive = header.get_u8();
        message.payload_length = header.get_u16();
    }
    if buf.len() < COMMON_HEADER_LEN {
        message
            .errors
            .push(ParseError::header(ParseErrorCode::WrongLength));
        return Ok(message);
    }

    if message.version != VERSION {
        message
            .errors
            .push(ParseError::header(ParseErrorCode::WrongVersion));
    }
    if message.reserved != 0 {
        message
            .errors
            .push(ParseError::header(ParseErrorCode::ReservedNotZero));
    }
    let declared = usize::from(message.payload_length) * 4 + COMMON_HEADER_LEN;
    if buf.len() % 4 != 0 || declared != buf.len() {
        message
            .errors
            .push(ParseError::header(ParseErrorCode::WrongLength));
    }
    if !message.errors.is_empty() {
        tracing::trace!(errors = ?message.errors, "rejected BFCP header");
        return Ok(message);
    }

    let mut ids = &buf[4..COMMON_HEADER_LEN];
    let conference_id = ids.get_u32();
    let transaction_id = ids.get_u16();
    let user_id = ids.get_u16();
    let entity = Entity::new(conference_id, transaction_id, user_id);
    message.entity = Some(entity);
    message.attributes = scan_attributes(buf, COMMON_HEADER_LEN, buf.len(), &mut message.errors);

    let Some(primitive) = Primitive::from_code(message.primitive) else {
        message
            .errors
            .push(ParseError::header(ParseErrorCode::UnknownPrimitive));
        return Ok(message);
    };

    let arguments = extract(
        buf,
        Arguments::new(primitive, entity),
        &mut message.attributes,
        &mut message.errors,
    )?;
    tracing::trace!(
        primitive = %primitive,
        conference_id = entity.conference_id,
        user_id = entity.user_id,
        attributes = message.attributes.len(),
        errors = message.errors.len(),
        "parsed BFCP message"
    );
    message.arguments = Some(arguments);
    Ok(message)
}

/// Walk the attribute headers in `buf[start..end]`.
///
/// A zero length cannot be advanced past, so it invalidates the attribute
/// and its predecessor and stops the scan. A length that is too short or
/// runs past `end` invalidates the attribute and stops the scan too.
fn scan_attributes(
    buf: &[u8],
    start: usize,
    end: usize,
    errors: &mut Vec<ParseError>,
) -> Vec<ReceivedAttribute> {
    let mut attributes: Vec<ReceivedAttribute> = Vec::new();
    let mut offset = start;

    while offset < end {
        if end - offset < 2 {
            errors.push(ParseError::header(ParseErrorCode::WrongLength));
            break;
        }
        let mut header = &buf[offset..offset + 2];
        let type_and_flag = header.get_u8();
        let mut attr = ReceivedAttribute {
            position: offset,
            kind: type_and_flag >> 1,
            mandatory: type_and_flag & 0x01 == 1,
            length: header.get_u8(),
            valid: true,
        };
        let length = usize::from(attr.length);

        if length == 0 {
            attr.valid = false;
            errors.push(ParseError::attribute(&attr, ParseErrorCode::WrongLength));
            if let Some(previous) = attributes.last_mut() {
                previous.valid = false;
                errors.push(ParseError::attribute(previous, ParseErrorCode::WrongLength));
            }
            attributes.push(attr);
            break;
        }
        if length < 2 || offset + length > end {
            attr.valid = false;
            errors.push(ParseError::attribute(&attr, ParseErrorCode::WrongLength));
            attributes.push(attr);
            break;
        }

        attributes.push(attr);
        offset += padded_len(length);
    }

    attributes
}

fn value_of<'a>(buf: &'a [u8], attr: &ReceivedAttribute) -> &'a [u8] {
    &buf[attr.position + 2..attr.position + usize::from(attr.length)]
}

fn extract(
    buf: &[u8],
    mut args: Arguments,
    attributes: &mut [ReceivedAttribute],
    errors: &mut Vec<ParseError>,
) -> Result<Arguments> {
    for attr in attributes.iter_mut().filter(|a| a.valid) {
        let Some(kind) = AttributeType::from_code(attr.kind) else {
            attr.valid = false;
            errors.push(ParseError::attribute(attr, ParseErrorCode::UnknownAttribute));
            continue;
        };
        if kind.is_nested_only() {
            return Err(BfcpError::Parse {
                kind: ParseErrorKind::MisplacedAttribute(kind),
            });
        }

        let value = value_of(buf, attr);
        let decoded = match kind {
            AttributeType::FloorId => nonzero_u16(value).map(|id| args.floor_ids.push(id)),
            AttributeType::BeneficiaryId => {
                nonzero_u16(value).map(|id| args.beneficiary_id = Some(id))
            }
            AttributeType::FloorRequestId => {
                read_u16(value).map(|id| args.floor_request_id = Some(id))
            }
            AttributeType::Priority => read_priority(value).map(|p| args.priority = Some(p)),
            AttributeType::RequestStatus => {
                read_request_status(value).map(|s| args.request_status = Some(s))
            }
            AttributeType::ErrorCode => read_error_code(value).map(|e| args.error = Some(e)),
            AttributeType::ErrorInfo => read_text(value).map(|t| args.error_info = Some(t)),
            AttributeType::ParticipantProvidedInfo => {
                read_text(value).map(|t| args.participant_info = Some(t))
            }
            AttributeType::StatusInfo => read_text(value).map(|t| args.status_info = Some(t)),
            AttributeType::SupportedPrimitives => read_supported_primitives(value)
                .map(|list| args.supported_primitives = list),
            AttributeType::SupportedAttributes => read_supported_attributes(value)
                .map(|list| args.supported_attributes = list),
            AttributeType::BeneficiaryInformation => {
                read_user_information(value).map(|info| args.beneficiary = Some(info))
            }
            AttributeType::FloorRequestInformation => read_floor_request_information(value)
                .map(|info| args.floor_request_info.push(info)),
            AttributeType::Nonce => read_u16(value).map(|n| args.nonce = Some(n)),
            AttributeType::Digest => read_digest(value).map(|d| args.digest = Some(d)),
            AttributeType::UserDisplayName
            | AttributeType::UserUri
            | AttributeType::RequestedByInformation
            | AttributeType::FloorRequestStatus
            | AttributeType::OverallRequestStatus => None,
        };

        if decoded.is_none() {
            attr.valid = false;
            errors.push(ParseError::attribute(attr, ParseErrorCode::ParsingError));
            tracing::trace!(attribute = %kind, "invalid attribute value");
        }
    }
    Ok(args)
}

fn read_u16(mut value: &[u8]) -> Option<u16> {
    if value.remaining() != 2 {
        return None;
    }
    Some(value.get_u16())
}

fn nonzero_u16(value: &[u8]) -> Option<u16> {
    read_u16(value).filter(|&id| id != 0)
}

fn read_priority(value: &[u8]) -> Option<Priority> {
    let raw = read_u16(value)?;
    if raw & 0x1fff != 0 {
        return None;
    }
    Priority::from_code((raw >> 13) as u8)
}

fn read_request_status(mut value: &[u8]) -> Option<RequestStatusValue> {
    if value.remaining() != 2 {
        return None;
    }
    let status = RequestStatus::from_code(value.get_u8())?;
    Some(RequestStatusValue::new(status, value.get_u8()))
}

fn read_error_code(mut value: &[u8]) -> Option<ErrorValue> {
    if !value.has_remaining() {
        return None;
    }
    let code = ErrorCode::from_code(value.get_u8())?;
    let details = value.chunk();
    if code != ErrorCode::UnknownMandatoryAttribute {
        return Some(ErrorValue::new(code));
    }
    if details.is_empty() || details.iter().any(|b| b & 0x01 != 0) {
        return None;
    }
    Some(ErrorValue::unknown_attributes(
        details.iter().map(|b| b >> 1).collect(),
    ))
}

fn read_text(value: &[u8]) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    String::from_utf8(value.to_vec()).ok()
}

fn read_supported_primitives(value: &[u8]) -> Option<Vec<Primitive>> {
    if value.is_empty() {
        return None;
    }
    // Codes this implementation does not know are skipped.
    Some(value.iter().filter_map(|&c| Primitive::from_code(c)).collect())
}

fn read_supported_attributes(value: &[u8]) -> Option<Vec<AttributeType>> {
    if value.is_empty() {
        return None;
    }
    Some(
        value
            .iter()
            .filter_map(|&c| AttributeType::from_code(c >> 1))
            .collect(),
    )
}

fn read_digest(mut value: &[u8]) -> Option<Digest> {
    if !value.has_remaining() {
        return None;
    }
    let algorithm = value.get_u8();
    Some(Digest {
        algorithm,
        text: String::from_utf8(value.chunk().to_vec()).ok()?,
    })
}

/// Split a grouped value into its leading id and its nested attributes.
/// Any scan error inside the group invalidates the whole group; nested
/// attributes of unknown type are skipped.
fn open_group(value: &[u8]) -> Option<(u16, Vec<(AttributeType, &[u8])>)> {
    if value.len() < 2 {
        return None;
    }
    let mut head = &value[..2];
    let id = head.get_u16();
    let mut errors = Vec::new();
    let nested = scan_attributes(value, 2, value.len(), &mut errors);
    if !errors.is_empty() {
        return None;
    }
    let children = nested
        .iter()
        .filter_map(|attr| {
            AttributeType::from_code(attr.kind).map(|kind| (kind, value_of(value, attr)))
        })
        .collect();
    Some((id, children))
}

fn read_user_information(value: &[u8]) -> Option<UserInformation> {
    let (user_id, children) = open_group(value)?;
    let mut info = UserInformation::new(user_id);
    for (kind, value) in children {
        match kind {
            AttributeType::UserDisplayName => info.display_name = Some(read_text(value)?),
            AttributeType::UserUri => info.uri = Some(read_text(value)?),
            _ => {}
        }
    }
    Some(info)
}

fn read_status_parts(
    children: Vec<(AttributeType, &[u8])>,
) -> Option<(Option<RequestStatusValue>, Option<String>)> {
    let mut request_status = None;
    let mut status_info = None;
    for (kind, value) in children {
        match kind {
            AttributeType::RequestStatus => request_status = Some(read_request_status(value)?),
            AttributeType::StatusInfo => status_info = Some(read_text(value)?),
            _ => {}
        }
    }
    Some((request_status, status_info))
}

fn read_floor_request_status(value: &[u8]) -> Option<FloorRequestStatus> {
    let (floor_id, children) = open_group(value)?;
    let (request_status, status_info) = read_status_parts(children)?;
    Some(FloorRequestStatus {
        floor_id,
        request_status,
        status_info,
    })
}

fn read_overall_request_status(value: &[u8]) -> Option<OverallRequestStatus> {
    let (floor_request_id, children) = open_group(value)?;
    let (request_status, status_info) = read_status_parts(children)?;
    Some(OverallRequestStatus {
        floor_request_id,
        request_status,
        status_info,
    })
}

fn read_floor_request_information(value: &[u8]) -> Option<FloorRequestInformation> {
    let (floor_request_id, children) = open_group(value)?;
    let mut info = FloorRequestInformation::new(floor_request_id);
    for (kind, value) in children {
        match kind {
            AttributeType::OverallRequestStatus => {
                info.overall_status = Some(read_overall_request_status(value)?);
            }
            AttributeType::FloorRequestStatus => {
                info.floor_statuses.push(read_floor_request_status(value)?);
            }
            AttributeType::BeneficiaryInformation => {
                info.beneficiary = Some(read_user_information(value)?);
            }
            AttributeType::RequestedByInformation => {
                info.requested_by = Some(read_user_information(value)?);
            }
            AttributeType::Priority => info.priority = Some(read_priority(value)?),
            AttributeType::ParticipantProvidedInfo => {
                info.participant_info = Some(read_text(value)?);
            }
            _ => {}
        }
    }
    Some(info)
}
