//! Handshake attributes captured by the negotiation layer.
//!
//! The attribute map is built once during the HTTP upgrade and never mutated
//! afterwards; lifecycle classification and binary-frame dispatch read it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute holding the end-user bearer credential.
pub const TOKEN: &str = "token";
/// Attribute holding the shared secret of a group connection.
pub const SECRET_KEY: &str = "secretKey";
/// Attribute holding the group id of a group connection.
pub const GROUP: &str = "group";

/// Immutable key/value attributes of one connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandshakeAttributes(BTreeMap<String, String>);

impl HandshakeAttributes {
    /// Empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used while the handshake is being assembled.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether an attribute is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Bearer credential, if present.
    pub fn token(&self) -> Option<&str> {
        self.get(TOKEN)
    }

    /// Shared secret, if present.
    pub fn secret_key(&self) -> Option<&str> {
        self.get(SECRET_KEY)
    }

    /// Group id, if present.
    pub fn group(&self) -> Option<&str> {
        self.get(GROUP)
    }

    /// Iterate attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HandshakeAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
