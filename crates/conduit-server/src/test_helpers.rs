//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conduit_auth::{AuthError, Authenticator};
use conduit_core::{ConnectionId, HandshakeAttributes, Principal};
use conduit_directory::store::Result as StoreResult;
use conduit_directory::{CacheError, CacheStore, MemoryStore};
use tokio::sync::mpsc;

use crate::connection::ClientConnection;

/// Resolves a fixed set of tokens and counts calls.
#[derive(Default)]
pub struct FakeAuthenticator {
    principals: HashMap<String, Principal>,
    pub calls: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn with(mut self, token: &str, user_id: i64, tenant_id: i64, role_id: Option<i64>) -> Self {
        let _ = self.principals.insert(
            token.to_owned(),
            Principal {
                user_id,
                tenant_id,
                role_id,
                username: None,
                credential: token.to_owned(),
            },
        );
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.principals
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::Rejected {
                status: 401,
                body: "invalid_token".into(),
            })
    }
}

/// Cache backend whose writes always fail.
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn hash_put(&self, _: &str, _: &str, _: String, _: Duration) -> StoreResult<()> {
        Err(CacheError::Unavailable("store offline".into()))
    }

    async fn hash_get(&self, _: &str, _: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn hash_get_all(&self, _: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(Vec::new())
    }

    async fn hash_delete(&self, _: &str, _: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn hash_delete_if(&self, _: &str, _: &str, _: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn put(&self, _: &str, _: String, _: Duration) -> StoreResult<()> {
        Err(CacheError::Unavailable("store offline".into()))
    }

    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn delete(&self, _: &str) -> StoreResult<bool> {
        Ok(false)
    }
}

/// In-memory backend whose writes can be slowed down, and whose plain
/// `put` can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    write_delay: Duration,
    fail_puts: AtomicBool,
}

impl FlakyStore {
    pub fn with_write_delay(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    async fn pause(&self) {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.pause().await;
        self.inner.hash_put(key, field, value, ttl).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.inner.hash_delete(key, field).await
    }

    async fn hash_delete_if(&self, key: &str, field: &str, expected: &str) -> StoreResult<bool> {
        self.inner.hash_delete_if(key, field, expected).await
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.pause().await;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("store offline".into()));
        }
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }
}

/// A connection with the given id and attributes, plus its outbound queue.
pub fn make_connection(
    id: &str,
    attributes: HandshakeAttributes,
) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
    let (tx, rx) = mpsc::channel(16);
    let conn = Arc::new(ClientConnection::new(ConnectionId::from(id), attributes, tx));
    (conn, rx)
}
