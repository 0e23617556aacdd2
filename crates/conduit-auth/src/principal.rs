//! Principal extraction from the identity service response.
//!
//! The service returns an access-token description. The user details sit
//! under `details` (or `principal`) when the service wraps them, otherwise at
//! the top level. Tenant id may be reported as `tenantId` or
//! `organizationId`; numeric ids may arrive as numbers or strings.

use conduit_core::Principal;
use serde_json::{Map, Value};

use crate::errors::AuthError;

/// Build a [`Principal`] from an identity response body.
///
/// The returned principal carries an empty credential; the caller fills it in.
pub fn extract_principal(body: &Value) -> Result<Principal, AuthError> {
    let root = body
        .as_object()
        .ok_or_else(|| AuthError::NoPrincipal("response is not an object".into()))?;

    let details = ["details", "principal"]
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_object).filter(|m| m.contains_key("userId")))
        .unwrap_or(root);

    let user_id = id_field(details, &["userId"])
        .ok_or_else(|| AuthError::NoPrincipal("missing userId".into()))?;
    let tenant_id = id_field(details, &["tenantId", "organizationId"])
        .ok_or_else(|| AuthError::NoPrincipal("missing tenantId".into()))?;
    let role_id = id_field(details, &["roleId"]);
    let username = ["username", "user_name"]
        .iter()
        .find_map(|k| details.get(*k).and_then(Value::as_str))
        .map(str::to_owned);

    Ok(Principal {
        user_id,
        tenant_id,
        role_id,
        username,
        credential: String::new(),
    })
}

fn id_field(map: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
