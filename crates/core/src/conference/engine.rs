//! Floor request state machine: admission, chair decisions, promotion,
//! release, queries, and the cascades triggered by removing floors, chairs
//! and users.

use super::{ChairPolicy, Conference, Origin, Outgoing, Rejection};
use crate::error::{BfcpError, Result};
use crate::protocol::{
    Arguments, ErrorCode, FloorRequestInformation, Primitive, Priority, RequestStatus,
};
use crate::queue::{FloorRequest, FloorState, RequestQueue};
use crate::watchdog::WatchdogKey;

fn extract_if(
    queue: &mut RequestQueue,
    id: u16,
    predicate: impl Fn(&FloorRequest) -> bool,
) -> Option<FloorRequest> {
    if queue.get(id).is_some_and(predicate) {
        queue.extract(id)
    } else {
        None
    }
}

impl Conference {
    fn no_such_user(&self, user_id: u16) -> Rejection {
        Rejection::new(
            ErrorCode::UserDoesNotExist,
            format!("User {user_id} does not exist in Conference {}", self.id),
        )
    }

    fn no_such_floor(&self, floor_id: u16) -> Rejection {
        Rejection::new(
            ErrorCode::InvalidFloorId,
            format!("Floor {floor_id} does not exist in Conference {}", self.id),
        )
    }

    fn no_such_request(&self, floor_request_id: u16) -> Rejection {
        Rejection::new(
            ErrorCode::FloorRequestIdDoesNotExist,
            format!(
                "FloorRequest {floor_request_id} does not exist in Conference {}",
                self.id
            ),
        )
    }

    pub fn check_user(&self, user_id: u16) -> std::result::Result<(), Rejection> {
        if self.users.contains(user_id) {
            Ok(())
        } else {
            Err(self.no_such_user(user_id))
        }
    }

    fn locate(&self, id: u16) -> Option<(RequestStatus, &FloorRequest)> {
        self.granted
            .get(id)
            .map(|r| (RequestStatus::Granted, r))
            .or_else(|| self.accepted.get(id).map(|r| (RequestStatus::Accepted, r)))
            .or_else(|| self.pending.get(id).map(|r| (RequestStatus::Pending, r)))
    }

    fn locate_mut(&mut self, id: u16) -> Option<&mut FloorRequest> {
        if self.granted.contains(id) {
            self.granted.get_mut(id)
        } else if self.accepted.contains(id) {
            self.accepted.get_mut(id)
        } else {
            self.pending.get_mut(id)
        }
    }

    /// Undo what a request held: its timers, the floors it occupies and
    /// the holder's request counters.
    fn retire(&mut self, request: &FloorRequest) {
        self.watchdogs.cancel_request(request.id);
        let holder = request.holder();
        for entry in &request.floors {
            if entry.state == FloorState::Granted {
                self.floors.vacate(entry.floor_id);
            }
            self.users.release_request(holder, entry.floor_id);
        }
    }

    /// Admit a FloorRequest.
    ///
    /// Checks run in order: third-party requests need a chair, the
    /// beneficiary and every floor must exist, the chair policy may deny
    /// outright, and the holder must be under the per-floor request limit.
    pub fn request_floor(
        &mut self,
        origin: &Origin,
        args: &Arguments,
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        let user_id = origin.user_id();

        if let Some(beneficiary) = args.beneficiary_id {
            if !self.floors.is_chair(user_id) {
                return Err(Rejection::new(
                    ErrorCode::UnauthorizedOperation,
                    format!(
                        "Third-party FloorRequests only allowed for chairs \
                         (User {user_id} is not chair of any floor)"
                    ),
                ));
            }
            if !self.users.contains(beneficiary) {
                return Err(self.no_such_user(beneficiary));
            }
        }
        if let Some(&floor_id) = args.floor_ids.iter().find(|&&f| !self.floors.contains(f)) {
            return Err(self.no_such_floor(floor_id));
        }
        if args.floor_ids.is_empty() {
            return Err(Rejection::new(
                ErrorCode::InvalidFloorId,
                "There are no floors in the FloorRequest",
            ));
        }

        let holder = args.beneficiary_id.unwrap_or(user_id);
        let mut request = FloorRequest::new(
            0,
            user_id,
            args.beneficiary_id,
            args.priority.unwrap_or_default(),
            args.participant_info.clone(),
        );
        for &floor_id in &args.floor_ids {
            request.add_floor(floor_id);
        }

        if self.policy == ChairPolicy::AutoDeny
            && request
                .floors
                .iter()
                .any(|e| self.floors.chair(e.floor_id).is_none())
        {
            request.id = self.allocate_request_id();
            tracing::info!(
                conference_id = self.id,
                floor_request_id = request.id,
                user_id,
                "floor request denied, floor has no chair"
            );
            return Ok(vec![Outgoing {
                endpoint: origin.endpoint,
                arguments: self.request_status_message(
                    origin.entity,
                    &request,
                    RequestStatus::Denied,
                ),
            }]);
        }

        if let Some(entry) = request
            .floors
            .iter()
            .find(|e| self.users.is_full(holder, e.floor_id))
        {
            return Err(Rejection::new(
                ErrorCode::MaxFloorRequestsReached,
                format!(
                    "User {holder} has already reached the maximum allowed number of \
                     requests ({}) for Floor {} in Conference {}",
                    self.users.max_requests_per_floor(),
                    entry.floor_id,
                    self.id
                ),
            ));
        }

        request.id = self.allocate_request_id();
        let id = request.id;
        for entry in &mut request.floors {
            self.users.add_request(holder, entry.floor_id);
            if self.floors.chair(entry.floor_id).is_some() {
                self.watchdogs.arm(
                    WatchdogKey {
                        floor_request_id: id,
                        floor_id: entry.floor_id,
                    },
                    self.chair_wait,
                );
            } else {
                entry.state = FloorState::Accepted;
            }
        }

        let status = if request.all_in(FloorState::Accepted) {
            request.priority = Priority::Lowest;
            self.accepted.insert(request);
            RequestStatus::Accepted
        } else {
            self.pending.insert(request);
            RequestStatus::Pending
        };
        tracing::info!(
            conference_id = self.id,
            floor_request_id = id,
            user_id,
            holder,
            %status,
            "floor request admitted"
        );

        let mut out = Vec::new();
        if let Some((_, stored)) = self.locate(id) {
            self.notify(stored, status, &mut out);
            out.push(Outgoing {
                endpoint: origin.endpoint,
                arguments: self.request_status_message(origin.entity, stored, status),
            });
        }
        if let Some(stored) = self.locate_mut(id) {
            stored.subscribe(user_id, origin.endpoint);
        }
        if status == RequestStatus::Accepted {
            self.promote(&mut out);
        }
        Ok(out)
    }

    /// Withdraw (while Pending or Accepted) or release (while Granted) a
    /// request. An id of 0 selects the sender's own request.
    pub fn release_floor(
        &mut self,
        origin: &Origin,
        floor_request_id: u16,
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        let user_id = origin.user_id();
        let id = if floor_request_id != 0 {
            floor_request_id
        } else {
            self.accepted
                .find_by_user(user_id)
                .or_else(|| self.pending.find_by_user(user_id))
                .or_else(|| self.granted.find_by_user(user_id))
                .ok_or_else(|| {
                    Rejection::new(
                        ErrorCode::FloorRequestIdDoesNotExist,
                        format!(
                            "User {user_id} has no FloorRequest in Conference {}",
                            self.id
                        ),
                    )
                })?
        };

        let owned = move |r: &FloorRequest| r.involves(user_id);
        let (mut request, status) =
            if let Some(request) = extract_if(&mut self.accepted, id, owned) {
                (request, RequestStatus::Cancelled)
            } else if let Some(request) = extract_if(&mut self.pending, id, owned) {
                (request, RequestStatus::Cancelled)
            } else if let Some(request) = extract_if(&mut self.granted, id, owned) {
                (request, RequestStatus::Released)
            } else {
                return Err(self.no_such_request(id));
            };

        tracing::info!(
            conference_id = self.id,
            floor_request_id = id,
            user_id,
            %status,
            "floor request released"
        );
        self.retire(&request);

        let mut out = vec![Outgoing {
            endpoint: origin.endpoint,
            arguments: self.request_status_message(origin.entity, &request, status),
        }];
        request.unsubscribe(user_id);
        self.notify(&request, status, &mut out);
        self.promote(&mut out);
        Ok(out)
    }

    /// Apply a chair's decision to a request.
    ///
    /// The floors named in the FLOOR-REQUEST-STATUS list (or, if the list
    /// is empty, every floor of the request) must be chaired by the sender.
    /// ACCEPTED applies to Pending requests, DENIED to Pending or Accepted
    /// ones, REVOKED to Granted ones.
    pub fn chair_action(
        &mut self,
        origin: &Origin,
        info: Option<&FloorRequestInformation>,
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        let user_id = origin.user_id();
        let info = info.ok_or_else(|| {
            Rejection::new(
                ErrorCode::ParseError,
                "ChairAction without FLOOR-REQUEST-INFORMATION",
            )
        })?;
        let id = info.floor_request_id;
        let decision = info.requested_status().ok_or_else(|| {
            Rejection::new(ErrorCode::ParseError, "ChairAction without REQUEST-STATUS")
        })?;

        let mut listed: Vec<u16> = info.floor_statuses.iter().map(|f| f.floor_id).collect();
        if let Some(&floor_id) = listed.iter().find(|&&f| !self.floors.contains(f)) {
            return Err(self.no_such_floor(floor_id));
        }
        if listed.is_empty() {
            let (_, request) = self.locate(id).ok_or_else(|| self.no_such_request(id))?;
            listed = request.floor_ids();
        }
        if let Some(&floor_id) = listed
            .iter()
            .find(|&&f| self.floors.chair(f) != Some(user_id))
        {
            return Err(Rejection::new(
                ErrorCode::UnauthorizedOperation,
                format!(
                    "User {user_id} is not chair of Floor {floor_id} in Conference {}",
                    self.id
                ),
            ));
        }

        let chair_info = info
            .overall_status
            .as_ref()
            .and_then(|o| o.status_info.clone());
        let floor_info: Vec<(u16, Option<String>)> = info
            .floor_statuses
            .iter()
            .map(|f| (f.floor_id, f.status_info.clone()))
            .collect();

        let mut out = Vec::new();
        match decision.status {
            RequestStatus::Accepted => {
                let Some(request) = self.pending.get_mut(id) else {
                    return Err(self.no_such_request(id));
                };
                if let Some(&floor_id) = listed.iter().find(|&&f| !request.has_floor(f)) {
                    return Err(Rejection::new(
                        ErrorCode::InvalidFloorId,
                        format!("Floor {floor_id} is not part of FloorRequest {id}"),
                    ));
                }
                for &floor_id in &listed {
                    if let Some(entry) = request.floor_mut(floor_id) {
                        entry.state = FloorState::Accepted;
                        entry.chair_info = floor_info
                            .iter()
                            .find(|(f, _)| *f == floor_id)
                            .and_then(|(_, text)| text.clone());
                    }
                    self.watchdogs.cancel(WatchdogKey {
                        floor_request_id: id,
                        floor_id,
                    });
                }
                let complete = request.all_in(FloorState::Accepted);
                if complete {
                    request.chair_info = chair_info;
                }
                self.pending
                    .change_queue_position(id, decision.queue_position);
                tracing::info!(
                    conference_id = self.id,
                    floor_request_id = id,
                    chair = user_id,
                    complete,
                    "chair accepted floor request"
                );
                if complete {
                    self.move_to_accepted(id, &mut out);
                    self.promote(&mut out);
                }
            }
            RequestStatus::Denied => {
                let mut request = self
                    .pending
                    .extract(id)
                    .or_else(|| self.accepted.extract(id))
                    .ok_or_else(|| self.no_such_request(id))?;
                request.chair_info = chair_info;
                for (floor_id, text) in floor_info {
                    if let Some(entry) = request.floor_mut(floor_id) {
                        entry.chair_info = text;
                    }
                }
                tracing::info!(
                    conference_id = self.id,
                    floor_request_id = id,
                    chair = user_id,
                    "chair denied floor request"
                );
                self.retire(&request);
                self.notify(&request, RequestStatus::Denied, &mut out);
                self.promote(&mut out);
            }
            RequestStatus::Revoked => {
                let mut request = self
                    .granted
                    .extract(id)
                    .ok_or_else(|| self.no_such_request(id))?;
                request.chair_info = chair_info;
                for (floor_id, text) in floor_info {
                    if let Some(entry) = request.floor_mut(floor_id) {
                        entry.chair_info = text;
                    }
                }
                tracing::info!(
                    conference_id = self.id,
                    floor_request_id = id,
                    chair = user_id,
                    "chair revoked floor request"
                );
                self.notify(&request, RequestStatus::Revoked, &mut out);
                self.retire(&request);
                self.promote(&mut out);
            }
            other => {
                return Err(Rejection::new(
                    ErrorCode::ParseError,
                    format!("{other} is not a valid ChairAction decision"),
                ));
            }
        }

        out.push(Outgoing {
            endpoint: origin.endpoint,
            arguments: Arguments::new(Primitive::ChairActionAck, origin.entity),
        });
        Ok(out)
    }

    /// Describe a request and subscribe the sender to its updates.
    pub fn query_floor_request(
        &mut self,
        origin: &Origin,
        floor_request_id: u16,
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        let Some(request) = self.locate_mut(floor_request_id) else {
            return Err(self.no_such_request(floor_request_id));
        };
        request.subscribe(origin.user_id(), origin.endpoint);

        let Some((status, request)) = self.locate(floor_request_id) else {
            return Err(self.no_such_request(floor_request_id));
        };
        let position = match status {
            RequestStatus::Accepted => request.queue_position,
            RequestStatus::Pending => request.priority.code(),
            _ => 0,
        };
        let info = self.describe(request, status, position, None);
        Ok(vec![Outgoing {
            endpoint: origin.endpoint,
            arguments: Arguments::new(Primitive::FloorRequestStatus, origin.entity)
                .with_floor_request_info(info),
        }])
    }

    /// List the requests of the sender, or of `beneficiary`.
    pub fn query_user(
        &self,
        origin: &Origin,
        beneficiary: Option<u16>,
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        let mut args = Arguments::new(Primitive::UserStatus, origin.entity);
        let target = match beneficiary {
            Some(user_id) => {
                args.beneficiary = Some(
                    self.users
                        .information(user_id)
                        .ok_or_else(|| self.no_such_user(user_id))?,
                );
                user_id
            }
            None => origin.user_id(),
        };
        args.floor_request_info = self.user_requests(target);
        Ok(vec![Outgoing {
            endpoint: origin.endpoint,
            arguments: args,
        }])
    }

    /// Subscribe the sender to exactly `floor_ids` and report their state.
    pub fn query_floors(
        &mut self,
        origin: &Origin,
        floor_ids: &[u16],
    ) -> std::result::Result<Vec<Outgoing>, Rejection> {
        if let Some(&floor_id) = floor_ids.iter().find(|&&f| !self.floors.contains(f)) {
            return Err(self.no_such_floor(floor_id));
        }
        let user_id = origin.user_id();
        self.floors.unsubscribe_all(user_id);
        if floor_ids.is_empty() {
            return Ok(vec![Outgoing {
                endpoint: origin.endpoint,
                arguments: self.floor_status_message(origin.entity, None, None),
            }]);
        }

        let mut out = Vec::with_capacity(floor_ids.len());
        for &floor_id in floor_ids {
            if let Err(e) = self.floors.subscribe(floor_id, user_id, origin.endpoint) {
                tracing::warn!(error = %e, floor_id, "floor subscription failed");
            }
            out.push(Outgoing {
                endpoint: origin.endpoint,
                arguments: self.floor_status_message(origin.entity, Some(floor_id), None),
            });
        }
        Ok(out)
    }

    /// Handle an expired chair-wait timer: cancel the request if it is
    /// still Pending.
    pub fn expire(&mut self, key: WatchdogKey, generation: u64) -> Vec<Outgoing> {
        if !self.watchdogs.finish(key, generation) {
            return Vec::new();
        }
        let Some(request) = self.pending.extract(key.floor_request_id) else {
            return Vec::new();
        };
        tracing::info!(
            conference_id = self.id,
            floor_request_id = request.id,
            floor_id = key.floor_id,
            "chair did not act in time, floor request cancelled"
        );
        self.retire(&request);
        let mut out = Vec::new();
        self.notify(&request, RequestStatus::Cancelled, &mut out);
        out
    }

    fn move_to_accepted(&mut self, id: u16, out: &mut Vec<Outgoing>) {
        let Some(mut request) = self.pending.extract(id) else {
            return;
        };
        self.watchdogs.cancel_request(id);
        request.priority = Priority::Lowest;
        self.accepted.insert(request);
        if let Some(stored) = self.accepted.get(id) {
            self.notify(stored, RequestStatus::Accepted, out);
        }
    }

    /// Move Pending requests whose floors are all accepted to Accepted.
    fn settle_pending(&mut self, out: &mut Vec<Outgoing>) {
        let ready: Vec<u16> = self
            .pending
            .iter_front()
            .filter(|r| !r.floors.is_empty() && r.all_in(FloorState::Accepted))
            .map(|r| r.id)
            .collect();
        for id in ready {
            self.move_to_accepted(id, out);
        }
    }

    fn grant(&mut self, id: u16, out: &mut Vec<Outgoing>) {
        let Some(mut request) = self.accepted.extract(id) else {
            return;
        };
        request.priority = Priority::Lowest;
        request.queue_position = 0;
        self.granted.insert(request);
        if let Some(stored) = self.granted.get(id) {
            self.notify(stored, RequestStatus::Granted, out);
        }
    }

    /// Hand free floor capacity to Accepted requests.
    ///
    /// Floors are visited from the last registered to the first. For each
    /// one, Accepted requests are scanned from the front and given the
    /// floor while it has room. A request that then holds all its floors
    /// moves to Granted.
    pub(super) fn promote(&mut self, out: &mut Vec<Outgoing>) {
        for id in self.accepted.ids_front() {
            if self
                .accepted
                .get(id)
                .is_some_and(|r| !r.floors.is_empty() && r.all_in(FloorState::Granted))
            {
                self.grant(id, out);
            }
        }

        for floor_id in self.floors.ids().into_iter().rev() {
            for id in self.accepted.ids_front() {
                if !self.floors.has_room(floor_id) {
                    break;
                }
                let Some(request) = self.accepted.get_mut(id) else {
                    continue;
                };
                let Some(entry) = request.floor_mut(floor_id) else {
                    continue;
                };
                if entry.state == FloorState::Granted {
                    continue;
                }
                entry.state = FloorState::Granted;
                let complete = request.all_in(FloorState::Granted);
                self.floors.occupy(floor_id);
                tracing::debug!(
                    conference_id = self.id,
                    floor_request_id = id,
                    floor_id,
                    "floor granted"
                );
                if complete {
                    self.grant(id, out);
                }
            }
        }
    }

    /// Strip `floor_id` from every request. Requests that hold no other
    /// floor are cancelled.
    fn purge_floor(&mut self, floor_id: u16, out: &mut Vec<Outgoing>) {
        let only = |r: &FloorRequest| r.floors.len() == 1 && r.has_floor(floor_id);
        let mut emptied = self.pending.drain_where(only);
        emptied.extend(self.accepted.drain_where(only));
        emptied.extend(self.granted.drain_where(only));
        for request in &emptied {
            self.retire(request);
            self.notify(request, RequestStatus::Cancelled, out);
        }

        for queue in [&mut self.pending, &mut self.accepted, &mut self.granted] {
            for request in queue.iter_mut() {
                if request.remove_floor(floor_id).is_some() {
                    self.watchdogs.cancel(WatchdogKey {
                        floor_request_id: request.id,
                        floor_id,
                    });
                }
            }
        }
    }

    /// Delete a floor and purge it from every request.
    pub fn remove_floor(&mut self, floor_id: u16) -> Result<Vec<Outgoing>> {
        if !self.floors.contains(floor_id) {
            return Err(BfcpError::FloorNotFound(floor_id));
        }
        let mut out = Vec::new();
        self.purge_floor(floor_id, &mut out);
        self.floors.remove(floor_id, &mut self.users)?;
        self.settle_pending(&mut out);
        self.promote(&mut out);
        Ok(out)
    }

    /// Change the floor limit, deleting floors registered beyond it.
    pub fn resize_floors(&mut self, max_floors: usize) -> Result<Vec<Outgoing>> {
        if max_floors == 0 {
            return Err(BfcpError::InvalidArgument("max floors 0"));
        }
        let mut out = Vec::new();
        let excess: Vec<u16> = self.floors.ids().into_iter().skip(max_floors).collect();
        for floor_id in excess {
            self.purge_floor(floor_id, &mut out);
        }
        self.floors.resize(max_floors, &mut self.users)?;
        self.settle_pending(&mut out);
        self.promote(&mut out);
        Ok(out)
    }

    /// Take the chair away from a floor. Pending requests waiting on it
    /// are decided by the chair policy.
    pub fn remove_chair(&mut self, floor_id: u16) -> Result<Vec<Outgoing>> {
        if !self.floors.contains(floor_id) {
            return Err(BfcpError::FloorNotFound(floor_id));
        }
        let mut out = Vec::new();
        match self.policy {
            ChairPolicy::AutoDeny => {
                let dropped = self.pending.drain_where(|r| r.has_floor(floor_id));
                for request in &dropped {
                    self.retire(request);
                    self.notify(request, RequestStatus::Cancelled, &mut out);
                }
            }
            ChairPolicy::AutoAccept => {
                for request in self.pending.iter_mut() {
                    let key = WatchdogKey {
                        floor_request_id: request.id,
                        floor_id,
                    };
                    if let Some(entry) = request.floor_mut(floor_id) {
                        if entry.state == FloorState::Waiting {
                            entry.state = FloorState::Accepted;
                            entry.chair_info = None;
                        }
                        self.watchdogs.cancel(key);
                    }
                }
                self.settle_pending(&mut out);
                self.promote(&mut out);
            }
        }
        self.floors.set_chair(floor_id, None)?;
        Ok(out)
    }

    /// Delete a user: drop its subscriptions and chairships, and cancel
    /// every request it filed or benefits from.
    pub fn remove_user(&mut self, user_id: u16) -> Result<Vec<Outgoing>> {
        if !self.users.contains(user_id) {
            return Err(BfcpError::UserNotFound(user_id));
        }
        for queue in [&mut self.pending, &mut self.accepted, &mut self.granted] {
            for request in queue.iter_mut() {
                request.unsubscribe(user_id);
            }
        }
        self.floors.unsubscribe_all(user_id);

        let mut out = Vec::new();
        for floor_id in self.floors.chaired_by(user_id) {
            out.extend(self.remove_chair(floor_id)?);
        }

        let mut dropped = self.pending.drain_where(|r| r.involves(user_id));
        dropped.extend(self.accepted.drain_where(|r| r.involves(user_id)));
        dropped.extend(self.granted.drain_where(|r| r.involves(user_id)));
        for request in &dropped {
            self.retire(request);
            self.notify(request, RequestStatus::Cancelled, &mut out);
        }

        self.users.remove(user_id)?;
        self.promote(&mut out);
        tracing::info!(
            conference_id = self.id,
            user_id,
            cancelled = dropped.len(),
            "user removed from conference"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::conference::ConferenceConfig;
    use crate::protocol::{
        Entity, FloorRequestStatus, OverallRequestStatus, RequestStatusValue,
    };
    use crate::transport::Endpoint;
    use crate::watchdog::Watchdogs;

    fn conference(policy: ChairPolicy) -> Conference {
        let config = ConferenceConfig {
            max_floors: 4,
            max_requests_per_floor: 1,
            policy,
            chair_wait: Duration::from_secs(60),
        };
        let mut conf = Conference::new(1, config, Watchdogs::new(None)).unwrap();
        for user in [5, 6, 7, 9] {
            conf.add_user(user, None, None).unwrap();
        }
        conf
    }

    fn origin(user_id: u16) -> Origin {
        Origin::new(
            Entity::new(1, 40 + user_id, user_id),
            Endpoint::Connection(u64::from(user_id)),
        )
    }

    fn floor_request(user_id: u16, floors: &[u16]) -> Arguments {
        Arguments::new(Primitive::FloorRequest, origin(user_id).entity).with_floors(floors)
    }

    fn chair_decision(id: u16, floor_id: u16, status: RequestStatus) -> FloorRequestInformation {
        let mut info = FloorRequestInformation::new(id);
        info.overall_status = Some(OverallRequestStatus {
            floor_request_id: id,
            request_status: Some(RequestStatusValue::new(status, 0)),
            status_info: Some("decided".into()),
        });
        info.floor_statuses.push(FloorRequestStatus::new(floor_id));
        info
    }

    /// Overall statuses of FloorRequestStatus messages sent to `user_id`.
    fn reported(out: &[Outgoing], user_id: u16) -> Vec<RequestStatus> {
        out.iter()
            .filter(|o| o.endpoint == Endpoint::Connection(u64::from(user_id)))
            .filter(|o| o.arguments.primitive == Primitive::FloorRequestStatus)
            .filter_map(|o| o.arguments.floor_request_info.first())
            .filter_map(|info| info.requested_status())
            .map(|s| s.status)
            .collect()
    }

    #[test]
    fn chairless_floor_is_granted_immediately() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();

        let out = conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        assert_eq!(
            reported(&out, 5),
            vec![RequestStatus::Accepted, RequestStatus::Granted]
        );
        assert_eq!(conf.snapshot().granted, vec![1]);
        assert_eq!(conf.floors().occupancy(10), Some(1));
    }

    #[test]
    fn accepted_waits_for_capacity() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let out = conf.request_floor(&origin(6), &floor_request(6, &[10])).unwrap();
        assert_eq!(reported(&out, 6), vec![RequestStatus::Accepted]);
        assert_eq!(conf.snapshot().accepted, vec![2]);

        let out = conf.release_floor(&origin(5), 1).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Released]);
        assert_eq!(reported(&out, 6), vec![RequestStatus::Granted]);
        assert_eq!(conf.snapshot().granted, vec![2]);
        assert_eq!(conf.floors().occupancy(10), Some(1));
    }

    #[test]
    fn chaired_floor_waits_in_pending() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();

        let out = conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Pending]);
        assert_eq!(conf.snapshot().pending, vec![1]);

        let info = chair_decision(1, 10, RequestStatus::Accepted);
        let out = conf.chair_action(&origin(9), Some(&info)).unwrap();
        assert_eq!(
            reported(&out, 5),
            vec![RequestStatus::Accepted, RequestStatus::Granted]
        );
        assert_eq!(
            out.last().unwrap().arguments.primitive,
            Primitive::ChairActionAck
        );
        assert_eq!(conf.snapshot().granted, vec![1]);
    }

    #[test]
    fn only_the_chair_may_decide() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let info = chair_decision(1, 10, RequestStatus::Accepted);
        let err = conf.chair_action(&origin(6), Some(&info)).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnauthorizedOperation);
        assert_eq!(conf.snapshot().pending, vec![1]);
    }

    #[test]
    fn deny_releases_request_counter() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        assert!(conf.users().is_full(5, 10));

        let info = chair_decision(1, 10, RequestStatus::Denied);
        let out = conf.chair_action(&origin(9), Some(&info)).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Denied]);
        assert!(!conf.users().is_full(5, 10));
        assert_eq!(conf.snapshot(), Default::default());
    }

    #[test]
    fn revoke_promotes_next() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        for user in [5, 6] {
            conf.request_floor(&origin(user), &floor_request(user, &[10]))
                .unwrap();
        }
        for id in [1, 2] {
            let info = chair_decision(id, 10, RequestStatus::Accepted);
            conf.chair_action(&origin(9), Some(&info)).unwrap();
        }
        assert_eq!(conf.snapshot().granted, vec![1]);
        assert_eq!(conf.snapshot().accepted, vec![2]);

        let info = chair_decision(1, 10, RequestStatus::Revoked);
        let out = conf.chair_action(&origin(9), Some(&info)).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Revoked]);
        assert_eq!(reported(&out, 6), vec![RequestStatus::Granted]);
        assert_eq!(conf.floors().occupancy(10), Some(1));
    }

    #[test]
    fn revoke_requires_granted() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        let info = chair_decision(1, 10, RequestStatus::Revoked);
        let err = conf.chair_action(&origin(9), Some(&info)).unwrap_err();
        assert_eq!(err.code, ErrorCode::FloorRequestIdDoesNotExist);
    }

    #[test]
    fn rate_limit_per_floor() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.add_floor(11, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let err = conf
            .request_floor(&origin(5), &floor_request(5, &[10]))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MaxFloorRequestsReached);
        assert!(conf.request_floor(&origin(5), &floor_request(5, &[11])).is_ok());

        conf.release_floor(&origin(5), 1).unwrap();
        assert!(conf.request_floor(&origin(5), &floor_request(5, &[10])).is_ok());
    }

    #[test]
    fn third_party_request_needs_chair() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();

        let args = floor_request(5, &[10]).with_beneficiary_id(6);
        let err = conf.request_floor(&origin(5), &args).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnauthorizedOperation);

        let args = floor_request(9, &[10]).with_beneficiary_id(6);
        conf.request_floor(&origin(9), &args).unwrap();
        // The beneficiary holds the request counter.
        assert!(conf.users().is_full(6, 10));
        assert!(!conf.users().is_full(9, 10));

        let args = floor_request(9, &[10]).with_beneficiary_id(77);
        let err = conf.request_floor(&origin(9), &args).unwrap_err();
        assert_eq!(err.code, ErrorCode::UserDoesNotExist);
    }

    #[test]
    fn unknown_floor_rejected() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        let err = conf
            .request_floor(&origin(5), &floor_request(5, &[3]))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFloorId);
        assert_eq!(err.info, "Floor 3 does not exist in Conference 1");

        let err = conf
            .request_floor(&origin(5), &floor_request(5, &[]))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFloorId);
    }

    #[test]
    fn auto_deny_without_chair() {
        let mut conf = conference(ChairPolicy::AutoDeny);
        conf.add_floor(10, None, 1).unwrap();
        let out = conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Denied]);
        assert_eq!(conf.snapshot(), Default::default());
        assert!(!conf.users().is_full(5, 10));
    }

    #[test]
    fn release_without_id_finds_own_request() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let err = conf.release_floor(&origin(6), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::FloorRequestIdDoesNotExist);
        let err = conf.release_floor(&origin(6), 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::FloorRequestIdDoesNotExist);

        let out = conf.release_floor(&origin(5), 0).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Cancelled]);
        assert_eq!(conf.snapshot(), Default::default());
    }

    #[test]
    fn release_without_id_prefers_waiting_request() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();
        conf.add_floor(11, None, 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        conf.request_floor(&origin(6), &floor_request(6, &[11])).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[11])).unwrap();
        assert_eq!(conf.snapshot().accepted, vec![3]);

        let out = conf.release_floor(&origin(5), 0).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Cancelled]);
        let snapshot = conf.snapshot();
        assert!(snapshot.accepted.is_empty());
        assert_eq!(snapshot.granted.len(), 2);
        assert!(snapshot.granted.contains(&1));
    }

    #[test]
    fn expired_watchdog_cancels_pending() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let key = WatchdogKey {
            floor_request_id: 1,
            floor_id: 10,
        };
        assert!(conf.expire(key, 99).is_empty());
        let out = conf.expire(key, 1);
        assert_eq!(reported(&out, 5), vec![RequestStatus::Cancelled]);
        assert!(!conf.users().is_full(5, 10));
        assert!(conf.snapshot().pending.is_empty());
    }

    #[test]
    fn removing_chair_accepts_pending() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let out = conf.remove_chair(10).unwrap();
        assert_eq!(
            reported(&out, 5),
            vec![RequestStatus::Accepted, RequestStatus::Granted]
        );
        assert_eq!(conf.floors().chair(10), None);
    }

    #[test]
    fn removing_chair_cancels_pending_under_auto_deny() {
        let mut conf = conference(ChairPolicy::AutoDeny);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let out = conf.remove_chair(10).unwrap();
        assert_eq!(reported(&out, 5), vec![RequestStatus::Cancelled]);
        assert!(!conf.users().is_full(5, 10));
    }

    #[test]
    fn removing_floor_purges_requests() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.add_floor(11, None, 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10, 11]))
            .unwrap();
        conf.request_floor(&origin(6), &floor_request(6, &[10])).unwrap();
        assert_eq!(conf.snapshot().pending, vec![1, 2]);

        let out = conf.remove_floor(10).unwrap();
        // Request 1 keeps floor 11, which was already accepted.
        assert_eq!(
            reported(&out, 5),
            vec![RequestStatus::Accepted, RequestStatus::Granted]
        );
        // Request 2 had no other floor.
        assert_eq!(reported(&out, 6), vec![RequestStatus::Cancelled]);
        assert_eq!(conf.snapshot().granted, vec![1]);
        assert!(conf.snapshot().pending.is_empty());
    }

    #[test]
    fn removing_user_cancels_its_requests() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        conf.request_floor(&origin(6), &floor_request(6, &[10])).unwrap();

        let out = conf.remove_user(5).unwrap();
        assert_eq!(reported(&out, 6), vec![RequestStatus::Granted]);
        assert_eq!(conf.snapshot().granted, vec![2]);
        assert!(conf.check_user(5).is_err());
    }

    #[test]
    fn capacity_bounds_concurrent_grants() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 2).unwrap();
        for user in [5, 6, 7] {
            conf.request_floor(&origin(user), &floor_request(user, &[10]))
                .unwrap();
        }
        let snapshot = conf.snapshot();
        assert_eq!(snapshot.granted.len(), 2);
        assert_eq!(snapshot.accepted, vec![3]);
        assert_eq!(conf.floors().occupancy(10), Some(2));

        let out = conf.set_floor_capacity(10, 0).unwrap();
        assert_eq!(reported(&out, 7), vec![RequestStatus::Granted]);
    }

    #[test]
    fn user_query_lists_requests() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();
        conf.add_floor(11, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[11])).unwrap();

        let out = conf.query_user(&origin(5), None).unwrap();
        let args = &out[0].arguments;
        assert_eq!(args.primitive, Primitive::UserStatus);
        assert!(args.beneficiary.is_none());
        let statuses: Vec<_> = args
            .floor_request_info
            .iter()
            .filter_map(|i| i.requested_status())
            .map(|s| s.status)
            .collect();
        assert_eq!(statuses, vec![RequestStatus::Granted, RequestStatus::Pending]);

        let out = conf.query_user(&origin(6), Some(5)).unwrap();
        assert_eq!(out[0].arguments.floor_request_info.len(), 2);
        assert_eq!(out[0].arguments.beneficiary.as_ref().unwrap().user_id, 5);
    }

    #[test]
    fn floor_query_subscribes() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, None, 1).unwrap();
        conf.add_floor(11, None, 1).unwrap();

        let out = conf.query_floors(&origin(7), &[10]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].arguments.floor_ids, vec![10]);

        let out = conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();
        let floor_status: Vec<_> = out
            .iter()
            .filter(|o| o.endpoint == Endpoint::Connection(7))
            .filter(|o| o.arguments.primitive == Primitive::FloorStatus)
            .collect();
        assert!(!floor_status.is_empty());

        let out = conf.query_floors(&origin(7), &[]).unwrap();
        assert!(out[0].arguments.floor_ids.is_empty());
        assert!(conf.floors().subscribers(10).is_empty());

        let err = conf.query_floors(&origin(7), &[12]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFloorId);
    }

    #[test]
    fn floor_request_query_subscribes() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.add_floor(10, Some(9), 1).unwrap();
        conf.request_floor(&origin(5), &floor_request(5, &[10])).unwrap();

        let out = conf.query_floor_request(&origin(6), 1).unwrap();
        assert_eq!(reported(&out, 6), vec![RequestStatus::Pending]);

        conf.remove_chair(10).unwrap();
        let out = conf.release_floor(&origin(5), 1).unwrap();
        assert_eq!(reported(&out, 6), vec![RequestStatus::Released]);

        let err = conf.query_floor_request(&origin(6), 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::FloorRequestIdDoesNotExist);
    }

    #[test]
    fn request_ids_skip_zero_on_wrap() {
        let mut conf = conference(ChairPolicy::AutoAccept);
        conf.next_request_id = u16::MAX;
        assert_eq!(conf.allocate_request_id(), u16::MAX);
        assert_eq!(conf.allocate_request_id(), 1);
    }
}
