//! Per-node directory of live connections.
//!
//! This is the source of truth for which sockets this node holds. The shared
//! cache is derived from it and may lag behind; this map never does.
//! Entries are keyed by connection id, so one user may hold several entries
//! (one per device) and one group may hold several connections.

use std::sync::Arc;

use conduit_core::{
    BrokerId, ConnectionId, ConnectionKind, GroupSessionEntry, Principal, Transport,
    UserSessionEntry,
};
use dashmap::DashMap;

/// A registered end-user connection.
#[derive(Clone)]
pub struct UserSession {
    /// Directory entry published to the shared cache.
    pub entry: UserSessionEntry,
    /// Principal resolved at registration.
    pub principal: Principal,
    /// Live transport handle.
    pub transport: Arc<dyn Transport>,
}

/// A registered group connection.
#[derive(Clone)]
pub struct GroupSession {
    /// Directory entry published to the shared cache.
    pub entry: GroupSessionEntry,
    /// Live transport handle.
    pub transport: Arc<dyn Transport>,
}

/// In-memory directory of this node's user and group sessions.
pub struct LocalDirectory {
    broker_id: BrokerId,
    users: DashMap<ConnectionId, UserSession>,
    groups: DashMap<ConnectionId, GroupSession>,
}

impl LocalDirectory {
    /// Create an empty directory for the node `broker_id`.
    pub fn new(broker_id: BrokerId) -> Self {
        Self {
            broker_id,
            users: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// Id of the owning node.
    pub fn broker_id(&self) -> &BrokerId {
        &self.broker_id
    }

    /// Insert or replace the user session of `entry.connection_id`.
    ///
    /// Returns the replaced session, if the connection id was already
    /// registered as a user.
    pub fn add_user_session(
        &self,
        entry: UserSessionEntry,
        principal: Principal,
        transport: Arc<dyn Transport>,
    ) -> Option<UserSession> {
        let id = entry.connection_id.clone();
        self.users.insert(
            id,
            UserSession {
                entry,
                principal,
                transport,
            },
        )
    }

    /// Insert or replace the group session of `entry.connection_id`.
    pub fn add_group_session(
        &self,
        entry: GroupSessionEntry,
        transport: Arc<dyn Transport>,
    ) -> Option<GroupSession> {
        let id = entry.connection_id.clone();
        self.groups.insert(id, GroupSession { entry, transport })
    }

    /// Remove a connection from whichever scope holds it.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionKind> {
        if self.users.remove(id).is_some() {
            return Some(ConnectionKind::EndUser);
        }
        if self.groups.remove(id).is_some() {
            return Some(ConnectionKind::GroupSecret);
        }
        None
    }

    /// Remove a user session only if it still holds `transport`.
    ///
    /// Used to roll back a failed publish without evicting a newer
    /// registration that reused the connection id.
    pub fn remove_user_if(&self, id: &ConnectionId, transport: &Arc<dyn Transport>) -> bool {
        self.users
            .remove_if(id, |_, s| Arc::ptr_eq(&s.transport, transport))
            .is_some()
    }

    /// Remove a group session only if it still holds `transport`.
    pub fn remove_group_if(&self, id: &ConnectionId, transport: &Arc<dyn Transport>) -> bool {
        self.groups
            .remove_if(id, |_, s| Arc::ptr_eq(&s.transport, transport))
            .is_some()
    }

    /// Which scope a connection is registered in.
    pub fn kind_of(&self, id: &ConnectionId) -> Option<ConnectionKind> {
        if self.users.contains_key(id) {
            Some(ConnectionKind::EndUser)
        } else if self.groups.contains_key(id) {
            Some(ConnectionKind::GroupSecret)
        } else {
            None
        }
    }

    /// Whether a connection is registered in either scope.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.kind_of(id).is_some()
    }

    /// User session of a connection.
    pub fn user_session(&self, id: &ConnectionId) -> Option<UserSession> {
        self.users.get(id).map(|s| s.clone())
    }

    /// Group session of a connection.
    pub fn group_session(&self, id: &ConnectionId) -> Option<GroupSession> {
        self.groups.get(id).map(|s| s.clone())
    }

    /// Number of registered user connections.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of registered group connections.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Snapshot of every user entry.
    pub fn user_entries(&self) -> Vec<UserSessionEntry> {
        self.users.iter().map(|s| s.entry.clone()).collect()
    }

    /// Snapshot of every group entry.
    pub fn group_entries(&self) -> Vec<GroupSessionEntry> {
        self.groups.iter().map(|s| s.entry.clone()).collect()
    }

    /// Connections held by a user on this node.
    pub fn connections_for_user(&self, user_id: i64) -> Vec<ConnectionId> {
        self.users
            .iter()
            .filter(|s| s.entry.user_id == user_id)
            .map(|s| s.key().clone())
            .collect()
    }

    /// Connections joined to a group on this node.
    pub fn connections_for_group(&self, group: &str) -> Vec<ConnectionId> {
        self.groups
            .iter()
            .filter(|s| s.entry.group == group)
            .map(|s| s.key().clone())
            .collect()
    }

    /// Send a text frame to one connection. Returns whether it was queued.
    pub fn send_to_connection(&self, id: &ConnectionId, text: Arc<String>) -> bool {
        let transport = self
            .users
            .get(id)
            .map(|s| Arc::clone(&s.transport))
            .or_else(|| self.groups.get(id).map(|s| Arc::clone(&s.transport)));
        transport.is_some_and(|t| deliver(id, t.as_ref(), text))
    }

    /// Send a text frame to every local connection of a user.
    ///
    /// Returns the number of connections the frame was queued on.
    pub fn send_to_user(&self, user_id: i64, text: &Arc<String>) -> usize {
        let targets: Vec<(ConnectionId, Arc<dyn Transport>)> = self
            .users
            .iter()
            .filter(|s| s.entry.user_id == user_id)
            .map(|s| (s.key().clone(), Arc::clone(&s.transport)))
            .collect();
        fan_out(targets, text)
    }

    /// Send a text frame to every local connection of a group.
    pub fn send_to_group(&self, group: &str, text: &Arc<String>) -> usize {
        let targets: Vec<(ConnectionId, Arc<dyn Transport>)> = self
            .groups
            .iter()
            .filter(|s| s.entry.group == group)
            .map(|s| (s.key().clone(), Arc::clone(&s.transport)))
            .collect();
        fan_out(targets, text)
    }
}

// Targets are collected first so no shard lock is held while sending.
fn fan_out(targets: Vec<(ConnectionId, Arc<dyn Transport>)>, text: &Arc<String>) -> usize {
    targets
        .into_iter()
        .filter(|(id, t)| deliver(id, t.as_ref(), Arc::clone(text)))
        .count()
}

fn deliver(id: &ConnectionId, transport: &dyn Transport, text: Arc<String>) -> bool {
    match transport.send_text(text) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(conn_id = %id, error = %e, "local delivery failed");
            false
        }
    }
}
