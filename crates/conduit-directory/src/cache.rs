//! Typed key layout of the cluster-wide session cache.
//!
//! Every node writes only into its own buckets, so writes from different
//! nodes never collide:
//!
//! | Key | Field | Value |
//! |-----|-------|-------|
//! | `{prefix}:brokerServerSession:{broker}` | group id | [`GroupSessionEntry`] |
//! | `{prefix}:brokerUserSession:{broker}` | user id | [`UserSessionEntry`] |
//! | `{prefix}:sessionUser:{connection}` | (string key) | [`UserSessionEntry`] |
//! | `{prefix}:brokers` | broker id | heartbeat, epoch millis |
//!
//! Hash fields carry their own `expiresAt` stamp because a live broker keeps
//! its bucket key alive. Readers skip stale fields, and the reconciliation
//! task prunes them from the node's own buckets. Pruning deletes a field only
//! if it still holds the stale value it read, so a concurrent refresh wins.
//!
//! Upserts are idempotent and last-write-wins. Two connections of the same
//! group (or user) on one node share a field, so the cache points at the most
//! recently registered one; the local directory keeps both.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{BrokerId, ConnectionId, GroupSessionEntry, UserSessionEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::CacheError;
use crate::store::CacheStore;

type Result<T> = std::result::Result<T, CacheError>;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stamped<T> {
    #[serde(flatten)]
    entry: T,
    expires_at: i64,
}

/// Typed access to the shared session cache.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttl: Duration,
}

impl SessionCache {
    /// Create a cache view over `store`, writing keys under `prefix` with
    /// entries that live for `ttl` unless refreshed.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn group_bucket(&self, broker: &BrokerId) -> String {
        format!("{}:brokerServerSession:{broker}", self.prefix)
    }

    fn user_bucket(&self, broker: &BrokerId) -> String {
        format!("{}:brokerUserSession:{broker}", self.prefix)
    }

    fn session_user_key(&self, conn: &ConnectionId) -> String {
        format!("{}:sessionUser:{conn}", self.prefix)
    }

    fn brokers_key(&self) -> String {
        format!("{}:brokers", self.prefix)
    }

    fn stamp<T: Serialize>(&self, entry: &T) -> Result<String> {
        let expires_at = now_millis().saturating_add(millis(self.ttl));
        Ok(serde_json::to_string(&Stamped { entry, expires_at })?)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Upsert a group entry into its owner's bucket.
    #[tracing::instrument(skip_all, fields(broker_id = %entry.owner, group = %entry.group))]
    pub async fn refresh_group_session(&self, entry: &GroupSessionEntry) -> Result<()> {
        let value = self.stamp(entry)?;
        self.store
            .hash_put(&self.group_bucket(&entry.owner), &entry.group, value, self.ttl)
            .await
    }

    /// Upsert a user entry into its owner's bucket.
    #[tracing::instrument(skip_all, fields(broker_id = %entry.owner, user_id = entry.user_id))]
    pub async fn refresh_user_session(&self, entry: &UserSessionEntry) -> Result<()> {
        let value = self.stamp(entry)?;
        self.store
            .hash_put(
                &self.user_bucket(&entry.owner),
                &entry.user_id.to_string(),
                value,
                self.ttl,
            )
            .await
    }

    /// Upsert the reverse `connection → user` entry.
    #[tracing::instrument(skip_all, fields(conn_id = %entry.connection_id))]
    pub async fn refresh_session_user(&self, entry: &UserSessionEntry) -> Result<()> {
        let value = serde_json::to_string(entry)?;
        self.store
            .put(&self.session_user_key(&entry.connection_id), value, self.ttl)
            .await
    }

    /// Record a membership heartbeat for `broker`.
    pub async fn register_broker(&self, broker: &BrokerId) -> Result<()> {
        self.store
            .hash_put(&self.brokers_key(), broker, now_millis().to_string(), self.ttl)
            .await
    }

    /// Drop `broker` from the membership hash.
    pub async fn deregister_broker(&self, broker: &BrokerId) -> Result<bool> {
        self.store.hash_delete(&self.brokers_key(), broker).await
    }

    /// Remove `entry`'s user field from its owner's bucket, but only while the
    /// field still names `entry`'s connection. Also drops the reverse entry.
    ///
    /// Returns whether the bucket field was removed.
    #[tracing::instrument(skip_all, fields(broker_id = %entry.owner, user_id = entry.user_id))]
    pub async fn forget_user_session(&self, entry: &UserSessionEntry) -> Result<bool> {
        let _ = self.store.delete(&self.session_user_key(&entry.connection_id)).await?;
        let key = self.user_bucket(&entry.owner);
        let field = entry.user_id.to_string();
        let Some(raw) = self.store.hash_get(&key, &field).await? else {
            return Ok(false);
        };
        let names_entry = serde_json::from_str::<Stamped<UserSessionEntry>>(&raw)
            .is_ok_and(|s| s.entry.connection_id == entry.connection_id);
        if !names_entry {
            return Ok(false);
        }
        self.store.hash_delete_if(&key, &field, &raw).await
    }

    /// Drop expired keys the backend still holds. Returns how many went.
    pub async fn purge_store(&self) -> Result<usize> {
        self.store.purge_expired().await
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Brokers whose heartbeat is younger than the entry TTL.
    pub async fn brokers(&self) -> Result<Vec<BrokerId>> {
        let cutoff = now_millis().saturating_sub(millis(self.ttl));
        let mut live: Vec<BrokerId> = self
            .store
            .hash_get_all(&self.brokers_key())
            .await?
            .into_iter()
            .filter(|(_, beat)| beat.parse::<i64>().is_ok_and(|t| t >= cutoff))
            .map(|(id, _)| BrokerId::from(id))
            .collect();
        live.sort();
        Ok(live)
    }

    /// Live group entries in `broker`'s bucket.
    pub async fn group_sessions(&self, broker: &BrokerId) -> Result<Vec<GroupSessionEntry>> {
        self.live_fields(&self.group_bucket(broker)).await
    }

    /// Live user entries in `broker`'s bucket.
    pub async fn user_sessions(&self, broker: &BrokerId) -> Result<Vec<UserSessionEntry>> {
        self.live_fields(&self.user_bucket(broker)).await
    }

    /// Reverse lookup of the user behind a connection.
    pub async fn session_user(&self, conn: &ConnectionId) -> Result<Option<UserSessionEntry>> {
        match self.store.get(&self.session_user_key(conn)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Find every live broker's entry for `user_id`.
    pub async fn locate_user(&self, user_id: i64) -> Result<Vec<UserSessionEntry>> {
        let field = user_id.to_string();
        let mut found = Vec::new();
        for broker in self.brokers().await? {
            if let Some(entry) = self.live_field(&self.user_bucket(&broker), &field).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    /// Find every live broker's entry for `group`.
    pub async fn locate_group(&self, group: &str) -> Result<Vec<GroupSessionEntry>> {
        let mut found = Vec::new();
        for broker in self.brokers().await? {
            if let Some(entry) = self.live_field(&self.group_bucket(&broker), group).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    /// Delete stale fields from `broker`'s buckets. Returns how many were
    /// removed.
    pub async fn prune_expired(&self, broker: &BrokerId) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;
        for key in [self.group_bucket(broker), self.user_bucket(broker)] {
            for (field, raw) in self.store.hash_get_all(&key).await? {
                if expires_at(&raw).is_none_or(|t| t <= now)
                    && self.store.hash_delete_if(&key, &field, &raw).await?
                {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn live_fields<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let now = now_millis();
        let mut out = Vec::new();
        for (field, raw) in self.store.hash_get_all(key).await? {
            match serde_json::from_str::<Stamped<T>>(&raw) {
                Ok(s) if s.expires_at > now => out.push(s.entry),
                Ok(_) => {}
                Err(e) => tracing::warn!(key, field, error = %e, "skipping undecodable cache entry"),
            }
        }
        Ok(out)
    }

    async fn live_field<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.hash_get(key, field).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Stamped<T>>(&raw) {
            Ok(s) => Ok((s.expires_at > now_millis()).then_some(s.entry)),
            Err(e) => {
                tracing::warn!(key, field, error = %e, "skipping undecodable cache entry");
                Ok(None)
            }
        }
    }
}

fn expires_at(raw: &str) -> Option<i64> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()?
        .get("expiresAt")?
        .as_i64()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
