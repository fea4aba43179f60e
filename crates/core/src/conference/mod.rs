//! A conference: floors, users, and the floor request state machine.
//!
//! ## Request lifecycle
//!
//! ```text
//! FloorRequest ──► Pending ──(chair / policy accepts every floor)──► Accepted
//!                    │                                                  │
//!                    │ chair denies, timeout, release    promotion when │
//!                    ▼                                   capacity frees ▼
//!              Denied / Cancelled                                    Granted
//!                                                                       │
//!                                              release / chair revokes  ▼
//!                                                          Released / Revoked
//! ```
//!
//! Floors without a chair are decided by the [`ChairPolicy`]. Every
//! operation returns the messages it produced as [`Outgoing`] values;
//! nothing here performs I/O.

mod engine;
mod report;

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BfcpError, Result};
use crate::floor::FloorRegistry;
use crate::protocol::{Arguments, Entity, ErrorCode, RequestStatus};
use crate::queue::RequestQueue;
use crate::transport::Endpoint;
use crate::user::UserRegistry;
use crate::watchdog::Watchdogs;

/// What happens to requests for a floor that has no chair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChairPolicy {
    /// The floor is accepted without a chair decision.
    #[default]
    AutoAccept,
    /// The request is denied.
    AutoDeny,
}

#[derive(Debug, Clone)]
pub struct ConferenceConfig {
    pub max_floors: usize,
    pub max_requests_per_floor: u16,
    pub policy: ChairPolicy,
    /// How long a chair has to act before a Pending request is cancelled.
    pub chair_wait: Duration,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self {
            max_floors: 8,
            max_requests_per_floor: 1,
            policy: ChairPolicy::AutoAccept,
            chair_wait: Duration::from_secs(300),
        }
    }
}

/// A message produced by the engine, ready to be built and sent.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub endpoint: Endpoint,
    pub arguments: Arguments,
}

/// The sender of a request being handled.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub entity: Entity,
    pub endpoint: Endpoint,
}

impl Origin {
    pub fn new(entity: Entity, endpoint: Endpoint) -> Self {
        Self { entity, endpoint }
    }

    pub fn user_id(&self) -> u16 {
        self.entity.user_id
    }
}

/// A refused request, answered with an Error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: ErrorCode,
    pub info: String,
}

impl Rejection {
    pub fn new(code: ErrorCode, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }
}

/// Ids of the requests in each queue, front first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: Vec<u16>,
    pub accepted: Vec<u16>,
    pub granted: Vec<u16>,
}

impl QueueSnapshot {
    pub fn status_of(&self, floor_request_id: u16) -> Option<RequestStatus> {
        if self.granted.contains(&floor_request_id) {
            Some(RequestStatus::Granted)
        } else if self.accepted.contains(&floor_request_id) {
            Some(RequestStatus::Accepted)
        } else if self.pending.contains(&floor_request_id) {
            Some(RequestStatus::Pending)
        } else {
            None
        }
    }
}

pub struct Conference {
    id: u32,
    policy: ChairPolicy,
    chair_wait: Duration,
    floors: FloorRegistry,
    users: UserRegistry,
    pending: RequestQueue,
    accepted: RequestQueue,
    granted: RequestQueue,
    next_request_id: u16,
    watchdogs: Watchdogs,
}

impl Conference {
    pub fn new(id: u32, config: ConferenceConfig, watchdogs: Watchdogs) -> Result<Self> {
        if id == 0 {
            return Err(BfcpError::InvalidArgument("conference id 0"));
        }
        if config.max_floors == 0 {
            return Err(BfcpError::InvalidArgument("max floors 0"));
        }
        if config.max_requests_per_floor == 0 {
            return Err(BfcpError::InvalidArgument("request limit 0"));
        }
        tracing::info!(
            conference_id = id,
            max_floors = config.max_floors,
            max_requests = config.max_requests_per_floor,
            policy = ?config.policy,
            chair_wait_secs = config.chair_wait.as_secs(),
            "conference created"
        );
        Ok(Self {
            id,
            policy: config.policy,
            chair_wait: config.chair_wait,
            floors: FloorRegistry::new(config.max_floors),
            users: UserRegistry::new(config.max_requests_per_floor),
            pending: RequestQueue::new(),
            accepted: RequestQueue::new(),
            granted: RequestQueue::new(),
            next_request_id: 1,
            watchdogs,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn policy(&self) -> ChairPolicy {
        self.policy
    }

    pub fn chair_wait(&self) -> Duration {
        self.chair_wait
    }

    pub fn floors(&self) -> &FloorRegistry {
        &self.floors
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    /// A zero `chair_wait` keeps the current value.
    pub fn set_policy(&mut self, policy: ChairPolicy, chair_wait: Duration) {
        self.policy = policy;
        if !chair_wait.is_zero() {
            self.chair_wait = chair_wait;
        }
        tracing::debug!(
            conference_id = self.id,
            ?policy,
            chair_wait_secs = self.chair_wait.as_secs(),
            "chair policy changed"
        );
    }

    pub fn set_request_limit(&mut self, limit: u16) -> Result<()> {
        self.users.set_max_requests(limit)
    }

    pub fn add_user(
        &mut self,
        user_id: u16,
        uri: Option<String>,
        display_name: Option<String>,
    ) -> Result<()> {
        self.users.add(user_id, uri, display_name)
    }

    pub fn set_user_address(&mut self, user_id: u16, address: SocketAddr) -> Result<()> {
        self.users.set_address(user_id, address)
    }

    /// Route future notifications for `user_id` to `endpoint`.
    pub fn bind_user(&mut self, user_id: u16, endpoint: Endpoint) {
        self.users.bind(user_id, endpoint);
    }

    pub fn user_address(&self, user_id: u16) -> Result<Option<SocketAddr>> {
        if !self.users.contains(user_id) {
            return Err(BfcpError::UserNotFound(user_id));
        }
        Ok(self.users.address(user_id))
    }

    /// Add a floor. A chair must be an existing user; `capacity` 0 means
    /// unbounded.
    pub fn add_floor(&mut self, floor_id: u16, chair: Option<u16>, capacity: u16) -> Result<()> {
        if let Some(chair) = chair
            && !self.users.contains(chair)
        {
            return Err(BfcpError::UserNotFound(chair));
        }
        self.floors.insert(floor_id, chair)?;
        self.floors.set_capacity(floor_id, capacity)
    }

    pub fn set_chair(&mut self, floor_id: u16, chair: u16) -> Result<()> {
        if !self.users.contains(chair) {
            return Err(BfcpError::UserNotFound(chair));
        }
        self.floors.set_chair(floor_id, Some(chair))
    }

    /// Change how many requests may hold a floor at once. Raising the
    /// limit may grant waiting requests.
    pub fn set_floor_capacity(&mut self, floor_id: u16, limit: u16) -> Result<Vec<Outgoing>> {
        self.floors.set_capacity(floor_id, limit)?;
        let mut out = Vec::new();
        self.promote(&mut out);
        Ok(out)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending.ids_front(),
            accepted: self.accepted.ids_front(),
            granted: self.granted.ids_front(),
        }
    }

    /// Next unused floor request id. Ids wrap around, skipping 0 and any
    /// id still held by a live request.
    fn allocate_request_id(&mut self) -> u16 {
        loop {
            let id = self.next_request_id;
            self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
            if !self.pending.contains(id)
                && !self.accepted.contains(id)
                && !self.granted.contains(id)
            {
                return id;
            }
        }
    }
}

