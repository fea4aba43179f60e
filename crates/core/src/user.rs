//! Per-conference user registry.
//!
//! Besides identity, each user carries where to reach it and how many
//! floor requests it currently has outstanding per floor. The counters
//! are checked before a FloorRequest is admitted.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{BfcpError, Result};
use crate::protocol::UserInformation;
use crate::transport::Endpoint;

#[derive(Debug, Clone)]
pub struct User {
    pub id: u16,
    pub display_name: Option<String>,
    pub uri: Option<String>,
    /// Address configured by the application, used for UDP delivery
    /// until the user is heard from.
    pub address: Option<SocketAddr>,
    /// Endpoint of the last request received from this user.
    pub endpoint: Option<Endpoint>,
    requests: HashMap<u16, u16>,
}

impl User {
    /// Where to deliver notifications to this user.
    pub fn reachable_at(&self) -> Option<Endpoint> {
        self.endpoint.or(self.address.map(Endpoint::Datagram))
    }

    pub fn outstanding(&self, floor_id: u16) -> u16 {
        self.requests.get(&floor_id).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct UserRegistry {
    users: Vec<User>,
    max_requests_per_floor: u16,
}

impl UserRegistry {
    pub fn new(max_requests_per_floor: u16) -> Self {
        Self {
            users: Vec::new(),
            max_requests_per_floor: max_requests_per_floor.max(1),
        }
    }

    pub fn add(
        &mut self,
        id: u16,
        uri: Option<String>,
        display_name: Option<String>,
    ) -> Result<()> {
        if id == 0 {
            return Err(BfcpError::InvalidArgument("user id 0"));
        }
        if self.contains(id) {
            return Err(BfcpError::UserExists(id));
        }
        self.users.push(User {
            id,
            display_name: display_name.filter(|s| !s.is_empty()),
            uri: uri.filter(|s| !s.is_empty()),
            address: None,
            endpoint: None,
            requests: HashMap::new(),
        });
        tracing::debug!(user_id = id, total_users = self.users.len(), "user added");
        Ok(())
    }

    pub fn remove(&mut self, id: u16) -> Result<User> {
        let position = self
            .users
            .iter()
            .position(|u| u.id == id)
            .ok_or(BfcpError::UserNotFound(id))?;
        let user = self.users.remove(position);
        tracing::debug!(user_id = id, total_users = self.users.len(), "user removed");
        Ok(user)
    }

    pub fn get(&self, id: u16) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn get_mut(&mut self, id: u16) -> Result<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(BfcpError::UserNotFound(id))
    }

    pub fn contains(&self, id: u16) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn set_address(&mut self, id: u16, address: SocketAddr) -> Result<()> {
        self.get_mut(id)?.address = Some(address);
        Ok(())
    }

    pub fn address(&self, id: u16) -> Option<SocketAddr> {
        self.get(id).and_then(|u| u.address)
    }

    /// Remember the endpoint a user was last heard from.
    pub fn bind(&mut self, id: u16, endpoint: Endpoint) {
        if let Ok(user) = self.get_mut(id)
            && user.endpoint != Some(endpoint)
        {
            tracing::debug!(user_id = id, %endpoint, "user endpoint bound");
            user.endpoint = Some(endpoint);
        }
    }

    pub fn endpoint(&self, id: u16) -> Option<Endpoint> {
        self.get(id).and_then(User::reachable_at)
    }

    pub fn max_requests_per_floor(&self) -> u16 {
        self.max_requests_per_floor
    }

    pub fn set_max_requests(&mut self, limit: u16) -> Result<()> {
        if limit == 0 {
            return Err(BfcpError::InvalidArgument("request limit 0"));
        }
        self.max_requests_per_floor = limit;
        Ok(())
    }

    /// Whether the user already holds the maximum number of outstanding
    /// requests for `floor_id`. Unknown users are treated as full.
    pub fn is_full(&self, id: u16, floor_id: u16) -> bool {
        self.get(id)
            .is_none_or(|u| u.outstanding(floor_id) >= self.max_requests_per_floor)
    }

    pub fn add_request(&mut self, id: u16, floor_id: u16) {
        if let Ok(user) = self.get_mut(id) {
            let count = user.requests.entry(floor_id).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    pub fn release_request(&mut self, id: u16, floor_id: u16) {
        if let Ok(user) = self.get_mut(id)
            && let Some(count) = user.requests.get_mut(&floor_id)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                user.requests.remove(&floor_id);
            }
        }
    }

    /// Forget every user's counter for a floor that no longer exists.
    pub fn clear_floor(&mut self, floor_id: u16) {
        for user in &mut self.users {
            user.requests.remove(&floor_id);
        }
    }

    /// Identity as carried in BENEFICIARY- and REQUESTED-BY-INFORMATION.
    pub fn information(&self, id: u16) -> Option<UserInformation> {
        self.get(id).map(|u| UserInformation {
            user_id: u.id,
            display_name: u.display_name.clone(),
            uri: u.uri.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let mut users = UserRegistry::new(1);
        users
            .add(5, Some("sip:alice@example.com".into()), Some("Alice".into()))
            .unwrap();
        assert!(matches!(users.add(5, None, None), Err(BfcpError::UserExists(5))));
        assert!(users.contains(5));
        let info = users.information(5).unwrap();
        assert_eq!(info.display_name.as_deref(), Some("Alice"));
        users.remove(5).unwrap();
        assert!(matches!(users.remove(5), Err(BfcpError::UserNotFound(5))));
    }

    #[test]
    fn empty_strings_are_dropped() {
        let mut users = UserRegistry::new(1);
        users.add(5, Some(String::new()), None).unwrap();
        assert_eq!(users.information(5).unwrap().uri, None);
    }

    #[test]
    fn request_counters() {
        let mut users = UserRegistry::new(2);
        users.add(5, None, None).unwrap();
        users.add_request(5, 10);
        assert!(!users.is_full(5, 10));
        users.add_request(5, 10);
        assert!(users.is_full(5, 10));
        assert!(!users.is_full(5, 11));
        users.release_request(5, 10);
        assert!(!users.is_full(5, 10));
        users.release_request(5, 10);
        users.release_request(5, 10);
        assert_eq!(users.get(5).unwrap().outstanding(10), 0);
    }

    #[test]
    fn unknown_user_is_full() {
        let users = UserRegistry::new(1);
        assert!(users.is_full(9, 1));
    }

    #[test]
    fn endpoint_prefers_bound() {
        let mut users = UserRegistry::new(1);
        users.add(5, None, None).unwrap();
        assert_eq!(users.endpoint(5), None);
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        users.set_address(5, addr).unwrap();
        assert_eq!(users.endpoint(5), Some(Endpoint::Datagram(addr)));
        users.bind(5, Endpoint::Connection(3));
        assert_eq!(users.endpoint(5), Some(Endpoint::Connection(3)));
    }
}
