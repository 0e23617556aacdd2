//! Authenticated identity attached to an end-user connection.

use serde::{Deserialize, Serialize};

/// Identity resolved from a bearer credential by the identity service.
///
/// A principal is derived once at registration and again per inbound frame
/// for processors that ask for one. It is never cached beyond one dispatch.
///
/// The node that owns the connection is not part of the principal; it is
/// recorded next to it as [`UserSessionEntry::owner`](crate::UserSessionEntry::owner).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// User id.
    pub user_id: i64,
    /// Tenant (organization) id.
    pub tenant_id: i64,
    /// Current role id, when the identity service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,
    /// Login name, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Raw bearer credential the principal was resolved from.
    pub credential: String,
}

impl Principal {
    /// Credential with everything past the first 8 characters masked, for logs.
    pub fn masked_credential(&self) -> String {
        mask_credential(&self.credential)
    }
}

/// Mask a credential for logging.
pub fn mask_credential(credential: &str) -> String {
    let visible: String = credential.chars().take(8).collect();
    if visible.len() == credential.len() {
        visible
    } else {
        format!("{visible}…")
    }
}
