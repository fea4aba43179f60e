//! FloorRequestStatus, FloorStatus and UserStatus content, and fan-out of
//! state changes to interested users.

use super::{Conference, Outgoing};
use crate::protocol::{
    Arguments, Entity, FloorRequestInformation, FloorRequestStatus, OverallRequestStatus,
    Primitive, RequestStatus, RequestStatusValue,
};
use crate::queue::FloorRequest;
use crate::transport::Endpoint;

fn clamp_position(position: usize) -> u8 {
    u8::try_from(position).unwrap_or(u8::MAX)
}

impl Conference {
    pub(super) fn entity_for(&self, user_id: u16, transaction_id: u16) -> Entity {
        Entity::new(self.id, transaction_id, user_id)
    }

    /// Queue position reported alongside `status` in notifications:
    /// the priority while Pending, the place in line while Accepted.
    pub(super) fn reported_position(&self, request: &FloorRequest, status: RequestStatus) -> u8 {
        match status {
            RequestStatus::Pending => request.priority.code(),
            RequestStatus::Accepted => {
                clamp_position(self.accepted.front_position(request.id).unwrap_or(0))
            }
            _ => 0,
        }
    }

    /// Full FLOOR-REQUEST-INFORMATION for one request. When
    /// `floor_status` is set every FLOOR-REQUEST-STATUS repeats it.
    pub(super) fn describe(
        &self,
        request: &FloorRequest,
        status: RequestStatus,
        queue_position: u8,
        floor_status: Option<RequestStatus>,
    ) -> FloorRequestInformation {
        let mut info = FloorRequestInformation::new(request.id);
        info.overall_status = Some(OverallRequestStatus {
            floor_request_id: request.id,
            request_status: Some(RequestStatusValue::new(status, queue_position)),
            status_info: request.chair_info.clone(),
        });
        info.floor_statuses = request
            .floors
            .iter()
            .map(|entry| FloorRequestStatus {
                floor_id: entry.floor_id,
                request_status: floor_status.map(|s| RequestStatusValue::new(s, 0)),
                status_info: entry.chair_info.clone(),
            })
            .collect();
        info.beneficiary = request
            .beneficiary_id
            .and_then(|id| self.users.information(id));
        info.requested_by = self.users.information(request.user_id);
        info.priority = Some(request.priority);
        info.participant_info = request.participant_info.clone();
        Self::fit(request, info)
    }

    /// Trim optional text so the attribute can be encoded.
    fn fit(request: &FloorRequest, mut info: FloorRequestInformation) -> FloorRequestInformation {
        let full = info.encoded_len();
        if !info.trim_to_fit() {
            tracing::warn!(
                floor_request_id = request.id,
                len = full,
                "floor request too large to report"
            );
        } else if info.encoded_len() < full {
            tracing::debug!(
                floor_request_id = request.id,
                len = full,
                "optional text left out of report"
            );
        }
        info
    }

    pub(super) fn request_status_message(
        &self,
        entity: Entity,
        request: &FloorRequest,
        status: RequestStatus,
    ) -> Arguments {
        let position = self.reported_position(request, status);
        Arguments::new(Primitive::FloorRequestStatus, entity)
            .with_floor_request_info(self.describe(request, status, position, Some(status)))
    }

    /// The entry a FloorStatus carries for one request on one floor.
    fn floor_entry(
        request: &FloorRequest,
        floor_id: u16,
        status: RequestStatus,
        queue_position: u8,
    ) -> FloorRequestInformation {
        let mut info = FloorRequestInformation::new(request.id);
        info.overall_status = Some(OverallRequestStatus {
            floor_request_id: request.id,
            request_status: Some(RequestStatusValue::new(status, queue_position)),
            status_info: request.chair_info.clone(),
        });
        info.floor_statuses.push(FloorRequestStatus {
            floor_id,
            request_status: Some(RequestStatusValue::new(status, 0)),
            status_info: None,
        });
        Self::fit(request, info)
    }

    /// FloorStatus for `floor_id`: granted requests, then accepted ones
    /// with their place in line, then pending ones. A request that just
    /// left the queues with a terminal status is listed first.
    pub(super) fn floor_status_message(
        &self,
        entity: Entity,
        floor_id: Option<u16>,
        changed: Option<(&FloorRequest, RequestStatus)>,
    ) -> Arguments {
        let mut args = Arguments::new(Primitive::FloorStatus, entity);
        let Some(floor_id) = floor_id else {
            return args;
        };
        args.floor_ids.push(floor_id);

        let mut skip = None;
        if let Some((request, status)) = changed
            && status.is_terminal()
        {
            skip = Some(request.id);
            args.floor_request_info
                .push(Self::floor_entry(request, floor_id, status, 0));
        }
        let listed = |r: &&FloorRequest| r.has_floor(floor_id) && Some(r.id) != skip;

        for request in self.granted.iter_front().filter(listed) {
            args.floor_request_info
                .push(Self::floor_entry(request, floor_id, RequestStatus::Granted, 0));
        }
        for (index, request) in self.accepted.iter_front().enumerate() {
            if listed(&request) {
                args.floor_request_info.push(Self::floor_entry(
                    request,
                    floor_id,
                    RequestStatus::Accepted,
                    clamp_position(index + 1),
                ));
            }
        }
        for request in self.pending.iter_front().filter(listed) {
            args.floor_request_info
                .push(Self::floor_entry(request, floor_id, RequestStatus::Pending, 0));
        }
        args
    }

    /// Requests `target` filed or benefits from, for UserStatus.
    pub(super) fn user_requests(&self, target: u16) -> Vec<FloorRequestInformation> {
        let mut list = Vec::new();
        for request in self.granted.iter_front().filter(|r| r.involves(target)) {
            let granted = Some(RequestStatus::Granted);
            list.push(self.describe(request, RequestStatus::Granted, 0, granted));
        }
        for (index, request) in self.accepted.iter_front().enumerate() {
            if request.involves(target) {
                list.push(self.describe(
                    request,
                    RequestStatus::Accepted,
                    clamp_position(index + 1),
                    Some(RequestStatus::Accepted),
                ));
            }
        }
        for request in self.pending.iter_front().filter(|r| r.involves(target)) {
            let pending = Some(RequestStatus::Pending);
            list.push(self.describe(request, RequestStatus::Pending, 0, pending));
        }
        list
    }

    /// Fan a state change of `request` out to everyone interested.
    ///
    /// Each floor of the request gets a FloorStatus sent to its FloorQuery
    /// subscribers. A grant is also announced to every other user of the
    /// conference and a release to every user. Finally each subscriber of
    /// the request receives a FloorRequestStatus.
    pub(super) fn notify(
        &self,
        request: &FloorRequest,
        status: RequestStatus,
        out: &mut Vec<Outgoing>,
    ) {
        tracing::debug!(
            conference_id = self.id,
            floor_request_id = request.id,
            user_id = request.user_id,
            %status,
            "floor request state changed"
        );

        for entry in &request.floors {
            let mut recipients: Vec<(u16, Endpoint)> = self
                .floors
                .subscribers(entry.floor_id)
                .iter()
                .map(|s| (s.user_id, s.endpoint))
                .collect();
            let broadcast = match status {
                RequestStatus::Granted => true,
                RequestStatus::Released => true,
                _ => false,
            };
            if broadcast {
                for user in self.users.iter() {
                    if status == RequestStatus::Granted && user.id == request.user_id {
                        continue;
                    }
                    if recipients.iter().any(|(id, _)| *id == user.id) {
                        continue;
                    }
                    if let Some(endpoint) = user.reachable_at() {
                        recipients.push((user.id, endpoint));
                    }
                }
            }
            for (user_id, endpoint) in recipients {
                out.push(Outgoing {
                    endpoint,
                    arguments: self.floor_status_message(
                        self.entity_for(user_id, 0),
                        Some(entry.floor_id),
                        Some((request, status)),
                    ),
                });
            }
        }

        for subscriber in &request.subscribers {
            out.push(Outgoing {
                endpoint: subscriber.endpoint,
                arguments: self.request_status_message(
                    self.entity_for(subscriber.user_id, 0),
                    request,
                    status,
                ),
            });
        }
    }
}
