//! Session directory entries shared between the local directory and the
//! cluster-wide cache.

use serde::{Deserialize, Serialize};

use crate::ids::{BrokerId, ConnectionId};
use crate::principal::Principal;

/// The two kinds of connection a node accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionKind {
    /// Browser/app user authenticated with a bearer credential.
    EndUser,
    /// Service connection trusted through a shared secret plus group id.
    GroupSecret,
}

impl ConnectionKind {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndUser => "end_user",
            Self::GroupSecret => "group_secret",
        }
    }
}

/// Registration of an end-user connection.
///
/// Stored in the owning broker's user bucket and under the reverse
/// `connection id → user` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionEntry {
    /// Connection holding the socket.
    pub connection_id: ConnectionId,
    /// Tenant id of the principal.
    pub tenant_id: i64,
    /// User id of the principal.
    pub user_id: i64,
    /// Role id of the principal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,
    /// Bearer credential used at registration.
    pub credential: String,
    /// Node that owns the connection.
    pub owner: BrokerId,
}

impl UserSessionEntry {
    /// Build the entry for a principal registered on `owner`.
    pub fn new(connection_id: ConnectionId, principal: &Principal, owner: BrokerId) -> Self {
        Self {
            connection_id,
            tenant_id: principal.tenant_id,
            user_id: principal.user_id,
            role_id: principal.role_id,
            credential: principal.credential.clone(),
            owner,
        }
    }
}

/// Registration of a group (shared-secret) connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSessionEntry {
    /// Connection holding the socket.
    pub connection_id: ConnectionId,
    /// Group the connection joined.
    pub group: String,
    /// Node that owns the connection.
    pub owner: BrokerId,
}

impl GroupSessionEntry {
    /// Build the entry for a group connection registered on `owner`.
    pub fn new(connection_id: ConnectionId, group: impl Into<String>, owner: BrokerId) -> Self {
        Self {
            connection_id,
            group: group.into(),
            owner,
        }
    }
}
