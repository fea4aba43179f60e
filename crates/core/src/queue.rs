//! Floor request records and the ordered queues that hold them.
//!
//! A conference keeps three [`RequestQueue`]s (Pending, Accepted and
//! Granted) and every live [`FloorRequest`] is owned by exactly one of
//! them. Moving a request between states is `extract` from one queue
//! followed by `insert` into another.
//!
//! Queues are served from the front. Internally index 0 is the back of the
//! queue and the last element is the front:
//!
//! ```text
//! back                                       front
//! [ lowest priority ... ... highest priority ]  -> served first
//! ```

use crate::floor::Subscriber;
use crate::protocol::Priority;
use crate::transport::Endpoint;

/// Progress of one floor within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorState {
    /// Waiting for the floor chair.
    Waiting,
    /// Approved by the chair or the chair policy.
    Accepted,
    /// The request holds this floor.
    Granted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorEntry {
    pub floor_id: u16,
    pub state: FloorState,
    /// STATUS-INFO the chair supplied for this floor.
    pub chair_info: Option<String>,
}

/// A request for one or more floors.
#[derive(Debug, Clone)]
pub struct FloorRequest {
    pub id: u16,
    pub user_id: u16,
    pub beneficiary_id: Option<u16>,
    pub priority: Priority,
    /// Queue position a chair asked for. 0 means none.
    pub queue_position: u8,
    pub participant_info: Option<String>,
    /// STATUS-INFO the chair supplied for the request as a whole.
    pub chair_info: Option<String>,
    /// Sorted by floor id, highest first, without duplicates.
    pub floors: Vec<FloorEntry>,
    /// Users receiving FloorRequestStatus updates, newest first.
    pub subscribers: Vec<Subscriber>,
}

impl FloorRequest {
    pub fn new(
        id: u16,
        user_id: u16,
        beneficiary_id: Option<u16>,
        priority: Priority,
        participant_info: Option<String>,
    ) -> Self {
        Self {
            id,
            user_id,
            beneficiary_id,
            priority,
            queue_position: 0,
            participant_info,
            chair_info: None,
            floors: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Add a floor in Waiting state. Returns false for a duplicate.
    pub fn add_floor(&mut self, floor_id: u16) -> bool {
        match self
            .floors
            .binary_search_by(|entry| floor_id.cmp(&entry.floor_id))
        {
            Ok(_) => false,
            Err(index) => {
                self.floors.insert(
                    index,
                    FloorEntry {
                        floor_id,
                        state: FloorState::Waiting,
                        chair_info: None,
                    },
                );
                true
            }
        }
    }

    pub fn remove_floor(&mut self, floor_id: u16) -> Option<FloorEntry> {
        let index = self.floors.iter().position(|f| f.floor_id == floor_id)?;
        Some(self.floors.remove(index))
    }

    /// The user on whose behalf the floors are requested.
    pub fn holder(&self) -> u16 {
        self.beneficiary_id.unwrap_or(self.user_id)
    }

    /// Whether `user_id` filed this request or benefits from it.
    pub fn involves(&self, user_id: u16) -> bool {
        self.user_id == user_id || self.beneficiary_id == Some(user_id)
    }

    pub fn floor(&self, floor_id: u16) -> Option<&FloorEntry> {
        self.floors.iter().find(|f| f.floor_id == floor_id)
    }

    pub fn floor_mut(&mut self, floor_id: u16) -> Option<&mut FloorEntry> {
        self.floors.iter_mut().find(|f| f.floor_id == floor_id)
    }

    pub fn has_floor(&self, floor_id: u16) -> bool {
        self.floor(floor_id).is_some()
    }

    pub fn floor_ids(&self) -> Vec<u16> {
        self.floors.iter().map(|f| f.floor_id).collect()
    }

    /// Whether every floor has reached `state`.
    pub fn all_in(&self, state: FloorState) -> bool {
        self.floors.iter().all(|f| f.state == state)
    }

    pub fn subscribe(&mut self, user_id: u16, endpoint: Endpoint) {
        if !self.subscribers.iter().any(|s| s.user_id == user_id) {
            self.subscribers.insert(0, Subscriber { user_id, endpoint });
        }
    }

    pub fn unsubscribe(&mut self, user_id: u16) {
        self.subscribers.retain(|s| s.user_id != user_id);
    }
}

/// Ordered queue of floor requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<FloorRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a request according to its priority, or at the position a
    /// chair assigned.
    ///
    /// A request whose priority does not exceed the back of the queue is
    /// placed at the back. Otherwise it moves forward past every request
    /// of lower priority and stops behind the first one of equal or higher
    /// priority.
    ///
    /// A nonzero `queue_position` counts from the front (1 is the front)
    /// and resets the priority to lowest. A position beyond the queue
    /// length is discarded and the request goes to the back.
    pub fn insert(&mut self, mut request: FloorRequest) {
        if self.entries.is_empty() {
            self.entries.push(request);
            return;
        }

        if request.queue_position != 0 {
            let position = usize::from(request.queue_position);
            request.priority = Priority::Lowest;
            if position <= self.entries.len() {
                let index = self.entries.len() + 1 - position;
                self.entries.insert(index, request);
            } else {
                request.queue_position = 0;
                self.entries.insert(0, request);
            }
            return;
        }

        if self.entries[0].priority >= request.priority {
            self.entries.insert(0, request);
            return;
        }
        let mut index = 0;
        while index + 1 < self.entries.len()
            && self.entries[index + 1].priority < request.priority
        {
            index += 1;
        }
        self.entries.insert(index + 1, request);
    }

    pub fn extract(&mut self, id: u16) -> Option<FloorRequest> {
        let index = self.entries.iter().position(|r| r.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: u16) -> Option<&FloorRequest> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut FloorRequest> {
        self.entries.iter_mut().find(|r| r.id == id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.get(id).is_some()
    }

    /// Id of the request nearest the back that `user_id` filed.
    pub fn find_by_user(&self, user_id: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.id)
    }

    /// 1-based position counted from the front.
    pub fn front_position(&self, id: u16) -> Option<usize> {
        self.iter_front().position(|r| r.id == id).map(|p| p + 1)
    }

    /// Requests in service order, front first.
    pub fn iter_front(&self) -> impl Iterator<Item = &FloorRequest> {
        self.entries.iter().rev()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FloorRequest> {
        self.entries.iter_mut()
    }

    /// Ids in service order, front first.
    pub fn ids_front(&self) -> Vec<u16> {
        self.iter_front().map(|r| r.id).collect()
    }

    /// Store a chair-assigned position. The position only ever increases.
    pub fn change_queue_position(&mut self, id: u16, queue_position: u8) {
        if let Some(request) = self.get_mut(id)
            && queue_position > request.queue_position
        {
            request.queue_position = queue_position;
        }
    }

    /// Remove every request matching `predicate`, front first.
    pub fn drain_where(
        &mut self,
        mut predicate: impl FnMut(&FloorRequest) -> bool,
    ) -> Vec<FloorRequest> {
        let mut drained = Vec::new();
        let mut index = self.entries.len();
        while index > 0 {
            index -= 1;
            if predicate(&self.entries[index]) {
                drained.push(self.entries.remove(index));
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
