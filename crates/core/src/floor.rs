//! Per-conference floor registry.
//!
//! A floor is a grantable resource. Each one has an optional chair who
//! arbitrates requests for it, an occupancy count of requests currently
//! holding it, and a capacity bounding that count (`None` is unbounded).
//! Users that sent a FloorQuery for a floor are subscribed to its
//! FloorStatus updates.

use crate::error::{BfcpError, Result};
use crate::transport::Endpoint;
use crate::user::UserRegistry;

/// A user to be notified, and where to reach them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber {
    pub user_id: u16,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone)]
pub struct Floor {
    pub id: u16,
    pub chair: Option<u16>,
    pub occupancy: u16,
    pub capacity: Option<u16>,
    subscribers: Vec<Subscriber>,
}

impl Floor {
    fn new(id: u16, chair: Option<u16>) -> Self {
        Self {
            id,
            chair,
            occupancy: 0,
            capacity: Some(1),
            subscribers: Vec::new(),
        }
    }

    pub fn has_room(&self) -> bool {
        self.capacity.is_none_or(|limit| self.occupancy < limit)
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }
}

/// Bounded, insertion-ordered set of floors.
#[derive(Debug)]
pub struct FloorRegistry {
    floors: Vec<Floor>,
    max_floors: usize,
}

impl FloorRegistry {
    pub fn new(max_floors: usize) -> Self {
        Self {
            floors: Vec::with_capacity(max_floors),
            max_floors,
        }
    }

    pub fn insert(&mut self, id: u16, chair: Option<u16>) -> Result<()> {
        if id == 0 {
            return Err(BfcpError::InvalidArgument("floor id 0"));
        }
        if self.contains(id) {
            return Err(BfcpError::FloorExists(id));
        }
        if self.floors.len() >= self.max_floors {
            return Err(BfcpError::FloorRegistryFull(self.max_floors));
        }
        self.floors.push(Floor::new(id, chair));
        tracing::debug!(
            floor_id = id,
            chair = ?chair,
            total_floors = self.floors.len(),
            "floor added"
        );
        Ok(())
    }

    /// Remove a floor and every user's request counter for it.
    pub fn remove(&mut self, id: u16, users: &mut UserRegistry) -> Result<Floor> {
        let position = self.position(id).ok_or(BfcpError::FloorNotFound(id))?;
        let floor = self.floors.remove(position);
        users.clear_floor(id);
        tracing::debug!(floor_id = id, total_floors = self.floors.len(), "floor removed");
        Ok(floor)
    }

    /// Change the floor limit. Floors beyond the new limit are removed
    /// from the back and returned so the caller can purge their requests.
    pub fn resize(&mut self, max_floors: usize, users: &mut UserRegistry) -> Result<Vec<Floor>> {
        if max_floors == 0 {
            return Err(BfcpError::InvalidArgument("max floors 0"));
        }
        let mut dropped = Vec::new();
        while self.floors.len() > max_floors {
            if let Some(floor) = self.floors.pop() {
                users.clear_floor(floor.id);
                dropped.push(floor);
            }
        }
        self.max_floors = max_floors;
        Ok(dropped)
    }

    pub fn get(&self, id: u16) -> Option<&Floor> {
        self.floors.iter().find(|f| f.id == id)
    }

    fn get_mut(&mut self, id: u16) -> Result<&mut Floor> {
        self.floors
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(BfcpError::FloorNotFound(id))
    }

    pub fn position(&self, id: u16) -> Option<usize> {
        self.floors.iter().position(|f| f.id == id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.get(id).is_some()
    }

    /// Floor ids in registry order.
    pub fn ids(&self) -> Vec<u16> {
        self.floors.iter().map(|f| f.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Floor> {
        self.floors.iter()
    }

    pub fn len(&self) -> usize {
        self.floors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.floors.is_empty()
    }

    pub fn max_floors(&self) -> usize {
        self.max_floors
    }

    pub fn chair(&self, id: u16) -> Option<u16> {
        self.get(id).and_then(|f| f.chair)
    }

    pub fn set_chair(&mut self, id: u16, chair: Option<u16>) -> Result<()> {
        let floor = self.get_mut(id)?;
        floor.chair = chair;
        tracing::debug!(floor_id = id, chair = ?chair, "floor chair changed");
        Ok(())
    }

    /// Whether `user_id` chairs any floor.
    pub fn is_chair(&self, user_id: u16) -> bool {
        self.floors.iter().any(|f| f.chair == Some(user_id))
    }

    pub fn chaired_by(&self, user_id: u16) -> Vec<u16> {
        self.floors
            .iter()
            .filter(|f| f.chair == Some(user_id))
            .map(|f| f.id)
            .collect()
    }

    /// Set how many requests may hold the floor at once. 0 means unbounded.
    pub fn set_capacity(&mut self, id: u16, limit: u16) -> Result<()> {
        let floor = self.get_mut(id)?;
        floor.capacity = (limit != 0).then_some(limit);
        tracing::debug!(floor_id = id, capacity = ?floor.capacity, "floor capacity changed");
        Ok(())
    }

    pub fn has_room(&self, id: u16) -> bool {
        self.get(id).is_some_and(Floor::has_room)
    }

    pub fn occupancy(&self, id: u16) -> Option<u16> {
        self.get(id).map(|f| f.occupancy)
    }

    pub fn occupy(&mut self, id: u16) {
        if let Ok(floor) = self.get_mut(id) {
            floor.occupancy = floor.occupancy.saturating_add(1);
        }
    }

    pub fn vacate(&mut self, id: u16) {
        if let Ok(floor) = self.get_mut(id) {
            floor.occupancy = floor.occupancy.saturating_sub(1);
        }
    }

    /// Subscribe a user to FloorStatus updates, replacing any earlier
    /// endpoint it subscribed from.
    pub fn subscribe(&mut self, id: u16, user_id: u16, endpoint: Endpoint) -> Result<()> {
        let floor = self.get_mut(id)?;
        floor.subscribers.retain(|s| s.user_id != user_id);
        floor.subscribers.insert(0, Subscriber { user_id, endpoint });
        Ok(())
    }

    pub fn unsubscribe(&mut self, id: u16, user_id: u16) {
        if let Ok(floor) = self.get_mut(id) {
            floor.subscribers.retain(|s| s.user_id != user_id);
        }
    }

    pub fn unsubscribe_all(&mut self, user_id: u16) {
        for floor in &mut self.floors {
            floor.subscribers.retain(|s| s.user_id != user_id);
        }
    }

    pub fn subscribers(&self, id: u16) -> &[Subscriber] {
        self.get(id).map(Floor::subscribers).unwrap_or_default()
    }
}
