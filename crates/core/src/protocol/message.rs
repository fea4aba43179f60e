//! Typed representation of everything a BFCP message can carry.

use super::types::{AttributeType, Entity, ErrorCode, Primitive, Priority, RequestStatus};
use super::{MAX_ATTRIBUTE_LEN, padded_len};

/// Octets a text attribute occupies, padding included.
fn text_span(text: &Option<String>) -> usize {
    text.as_ref().map_or(0, |t| padded_len(2 + t.len()))
}

/// Octets of a REQUEST-STATUS attribute, when present.
fn status_span(value: Option<RequestStatusValue>) -> usize {
    if value.is_some() { 4 } else { 0 }
}

/// REQUEST-STATUS: a request state plus its position in a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStatusValue {
    pub status: RequestStatus,
    pub queue_position: u8,
}

impl RequestStatusValue {
    pub fn new(status: RequestStatus, queue_position: u8) -> Self {
        Self {
            status,
            queue_position,
        }
    }
}

/// ERROR-CODE. `unknown_attributes` is only encoded for
/// [`ErrorCode::UnknownMandatoryAttribute`], where it lists the offending
/// attribute types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub unknown_attributes: Vec<u8>,
}

impl ErrorValue {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            unknown_attributes: Vec::new(),
        }
    }

    pub fn unknown_attributes(attributes: Vec<u8>) -> Self {
        Self {
            code: ErrorCode::UnknownMandatoryAttribute,
            unknown_attributes: attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: u8,
    pub text: String,
}

/// BENEFICIARY-INFORMATION and REQUESTED-BY-INFORMATION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInformation {
    pub user_id: u16,
    pub display_name: Option<String>,
    pub uri: Option<String>,
}

impl UserInformation {
    pub fn new(user_id: u16) -> Self {
        Self {
            user_id,
            display_name: None,
            uri: None,
        }
    }

    fn encoded_len(&self) -> usize {
        4 + text_span(&self.display_name) + text_span(&self.uri)
    }
}

/// FLOOR-REQUEST-STATUS: the state of one floor within a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorRequestStatus {
    pub floor_id: u16,
    pub request_status: Option<RequestStatusValue>,
    pub status_info: Option<String>,
}

impl FloorRequestStatus {
    pub fn new(floor_id: u16) -> Self {
        Self {
            floor_id,
            request_status: None,
            status_info: None,
        }
    }
}

/// OVERALL-REQUEST-STATUS: the state of a request as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverallRequestStatus {
    pub floor_request_id: u16,
    pub request_status: Option<RequestStatusValue>,
    pub status_info: Option<String>,
}

impl OverallRequestStatus {
    pub fn new(floor_request_id: u16) -> Self {
        Self {
            floor_request_id,
            request_status: None,
            status_info: None,
        }
    }
}

/// FLOOR-REQUEST-INFORMATION: everything known about one floor request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorRequestInformation {
    pub floor_request_id: u16,
    pub overall_status: Option<OverallRequestStatus>,
    pub floor_statuses: Vec<FloorRequestStatus>,
    pub beneficiary: Option<UserInformation>,
    pub requested_by: Option<UserInformation>,
    pub priority: Option<Priority>,
    pub participant_info: Option<String>,
}

impl FloorRequestInformation {
    pub fn new(floor_request_id: u16) -> Self {
        Self {
            floor_request_id,
            overall_status: None,
            floor_statuses: Vec::new(),
            beneficiary: None,
            requested_by: None,
            priority: None,
            participant_info: None,
        }
    }

    /// Length the attribute header declares once encoded: header, id and
    /// every padded nested attribute.
    pub fn encoded_len(&self) -> usize {
        let overall = self.overall_status.as_ref().map_or(0, |o| {
            4 + status_span(o.request_status) + text_span(&o.status_info)
        });
        let floors: usize = self
            .floor_statuses
            .iter()
            .map(|f| 4 + status_span(f.request_status) + text_span(&f.status_info))
            .sum();
        let users: usize = [&self.beneficiary, &self.requested_by]
            .into_iter()
            .flatten()
            .map(UserInformation::encoded_len)
            .sum();
        let priority = if self.priority.is_some() { 4 } else { 0 };
        4 + overall + floors + users + priority + text_span(&self.participant_info)
    }

    pub fn fits(&self) -> bool {
        self.encoded_len() <= MAX_ATTRIBUTE_LEN
    }

    /// Drop optional text until the attribute fits its 8-bit length field.
    ///
    /// Goes in order: participant text, display names and URIs, per-floor
    /// chair text, then the overall chair text. Returns false if it still
    /// does not fit.
    pub fn trim_to_fit(&mut self) -> bool {
        if self.fits() {
            return true;
        }
        self.participant_info = None;
        if self.fits() {
            return true;
        }
        for user in [&mut self.beneficiary, &mut self.requested_by]
            .into_iter()
            .flatten()
        {
            user.display_name = None;
            user.uri = None;
        }
        if self.fits() {
            return true;
        }
        for status in &mut self.floor_statuses {
            status.status_info = None;
        }
        if self.fits() {
            return true;
        }
        if let Some(overall) = &mut self.overall_status {
            overall.status_info = None;
        }
        self.fits()
    }

    /// The status a chair asked for: the overall one, else the first
    /// per-floor one.
    pub fn requested_status(&self) -> Option<RequestStatusValue> {
        self.overall_status
            .as_ref()
            .and_then(|overall| overall.request_status)
            .or_else(|| self.floor_statuses.iter().find_map(|f| f.request_status))
    }
}

/// The sparse, primitive-specific content of a message.
///
/// Built by callers before [`build_message`](super::build_message) and
/// filled by [`parse_message`](super::parse_message). Fields outside the
/// grammar of `primitive` are ignored when building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments {
    pub primitive: Primitive,
    pub entity: Entity,
    pub floor_ids: Vec<u16>,
    pub beneficiary_id: Option<u16>,
    pub floor_request_id: Option<u16>,
    pub priority: Option<Priority>,
    pub request_status: Option<RequestStatusValue>,
    pub error: Option<ErrorValue>,
    pub error_info: Option<String>,
    pub participant_info: Option<String>,
    pub status_info: Option<String>,
    pub supported_primitives: Vec<Primitive>,
    pub supported_attributes: Vec<AttributeType>,
    pub beneficiary: Option<UserInformation>,
    pub floor_request_info: Vec<FloorRequestInformation>,
    pub nonce: Option<u16>,
    pub digest: Option<Digest>,
}

impl Arguments {
    pub fn new(primitive: Primitive, entity: Entity) -> Self {
        Self {
            primitive,
            entity,
            floor_ids: Vec::new(),
            beneficiary_id: None,
            floor_request_id: None,
            priority: None,
            request_status: None,
            error: None,
            error_info: None,
            participant_info: None,
            status_info: None,
            supported_primitives: Vec::new(),
            supported_attributes: Vec::new(),
            beneficiary: None,
            floor_request_info: Vec::new(),
            nonce: None,
            digest: None,
        }
    }

    #[must_use]
    pub fn with_floor(mut self, floor_id: u16) -> Self {
        self.floor_ids.push(floor_id);
        self
    }

    #[must_use]
    pub fn with_floors(mut self, floor_ids: &[u16]) -> Self {
        self.floor_ids.extend_from_slice(floor_ids);
        self
    }

    #[must_use]
    pub fn with_beneficiary_id(mut self, user_id: u16) -> Self {
        self.beneficiary_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_floor_request_id(mut self, floor_request_id: u16) -> Self {
        self.floor_request_id = Some(floor_request_id);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorValue) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_error_info(mut self, info: impl Into<String>) -> Self {
        self.error_info = Some(info.into());
        self
    }

    #[must_use]
    pub fn with_participant_info(mut self, info: impl Into<String>) -> Self {
        self.participant_info = Some(info.into());
        self
    }

    #[must_use]
    pub fn with_supported(
        mut self,
        primitives: &[Primitive],
        attributes: &[AttributeType],
    ) -> Self {
        self.supported_primitives = primitives.to_vec();
        self.supported_attributes = attributes.to_vec();
        self
    }

    #[must_use]
    pub fn with_beneficiary(mut self, information: UserInformation) -> Self {
        self.beneficiary = Some(information);
        self
    }

    #[must_use]
    pub fn with_floor_request_info(mut self, information: FloorRequestInformation) -> Self {
        self.floor_request_info.push(information);
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: u16) -> Self {
        self.nonce = Some(nonce);
        self
    }

    #[must_use]
    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }
}
