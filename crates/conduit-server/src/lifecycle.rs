//! Connection lifecycle controller.
//!
//! ```text
//! Opening ──classify──┬── token ──────────► authenticate ─► lock ─► EndUserActive ─┐
//!    │                └── secretKey+group ─────────────────► lock ─► GroupActive ──┤
//!    │                                                                             ▼
//!    └── unrecognized / unclassified / auth or cache failure ──────────────────► Closed
//! ```
//!
//! Registration publishes to the local directory first, then to the shared
//! cache, under a per-kind lock. A cache failure rolls the local entry back
//! and restores the user's cache field to a surviving local connection (or
//! removes it when none is left), so neither tier is left holding a
//! connection the other lacks. A lock timeout abandons registration and
//! leaves the connection open but unregistered.

use std::sync::Arc;
use std::time::Duration;

use conduit_auth::Authenticator;
use conduit_core::{
    ConnectionId, ConnectionKind, GroupSessionEntry, HandshakeAttributes, Principal, Transport,
    UserSessionEntry,
};
use conduit_directory::{CacheError, LocalDirectory, SessionCache};
use metrics::{counter, gauge};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::errors::LifecycleError;
use crate::metrics::{
    CONNECTIONS_REJECTED_TOTAL, REGISTRATION_TIMEOUTS_TOTAL, REGISTRATIONS_TOTAL, SESSIONS_ACTIVE,
};

/// Where a connection stands after [`LifecycleController::on_open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered as an end-user session.
    EndUserActive,
    /// Registered as a group session.
    GroupActive,
    /// Open at the transport layer but absent from the directory, because
    /// the registration lock was not acquired in time.
    Unregistered,
    /// Rejected and closed.
    Closed,
}

/// Decide which kind of connection the handshake attributes describe.
///
/// A non-empty `token` wins; otherwise both `secretKey` and `group` must be
/// non-empty.
pub fn classify(attributes: &HandshakeAttributes) -> Result<ConnectionKind, LifecycleError> {
    let present = |v: Option<&str>| v.is_some_and(|s| !s.is_empty());
    if present(attributes.token()) {
        Ok(ConnectionKind::EndUser)
    } else if present(attributes.secret_key()) && present(attributes.group()) {
        Ok(ConnectionKind::GroupSecret)
    } else {
        Err(LifecycleError::Unclassified)
    }
}

/// Close a transport, logging instead of propagating a failure.
pub fn close_quietly(transport: &dyn Transport) {
    if let Err(e) = transport.close() {
        debug!(error = %e, "close failed");
    }
}

/// Classifies, authenticates, and registers connections.
pub struct LifecycleController {
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<LocalDirectory>,
    cache: SessionCache,
    user_lock: Mutex<()>,
    group_lock: Mutex<()>,
    lock_timeout: Duration,
}

impl LifecycleController {
    /// Create a controller. `lock_timeout` bounds the wait for either
    /// registration lock.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<LocalDirectory>,
        cache: SessionCache,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            authenticator,
            directory,
            cache,
            user_lock: Mutex::new(()),
            group_lock: Mutex::new(()),
            lock_timeout,
        }
    }

    /// This node's directory.
    pub fn directory(&self) -> &Arc<LocalDirectory> {
        &self.directory
    }

    /// The shared cache this controller publishes into.
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Bring a freshly opened transport into an active state.
    ///
    /// Never fails: every error either rejects (closes) the connection or,
    /// for a lock timeout, leaves it unregistered.
    #[instrument(skip_all, fields(conn_id))]
    pub async fn on_open(&self, transport: Arc<dyn Transport>) -> ConnectionState {
        match self.open(Arc::clone(&transport)).await {
            Ok(state) => state,
            Err(err @ LifecycleError::LockTimeout(_)) => {
                warn!(error = %err, "registration abandoned, connection left unregistered");
                ConnectionState::Unregistered
            }
            Err(err) => {
                debug!(kind = %err.kind(), error = %err, "connection rejected");
                counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => err.kind().as_str()).increment(1);
                close_quietly(transport.as_ref());
                ConnectionState::Closed
            }
        }
    }

    async fn open(&self, transport: Arc<dyn Transport>) -> Result<ConnectionState, LifecycleError> {
        let id = transport
            .underlying_connection_id()
            .ok_or(LifecycleError::UnrecognizedTransport)?;
        let _ = tracing::Span::current().record("conn_id", id.as_str());

        match classify(transport.attributes())? {
            ConnectionKind::EndUser => {
                let _ = self.register_user(id, transport).await?;
                Ok(ConnectionState::EndUserActive)
            }
            ConnectionKind::GroupSecret => {
                self.register_group(id, transport).await?;
                Ok(ConnectionState::GroupActive)
            }
        }
    }

    /// Authenticate and register an end-user connection.
    ///
    /// Returns the resolved principal.
    pub async fn register_user(
        &self,
        id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) -> Result<Principal, LifecycleError> {
        let token = transport
            .attributes()
            .token()
            .ok_or(LifecycleError::Unclassified)?;
        let principal = self.authenticator.authenticate(token).await?;
        let entry = UserSessionEntry::new(id.clone(), &principal, self.directory.broker_id().clone());

        let _guard = self.acquire(&self.user_lock, ConnectionKind::EndUser).await?;
        let replaced = self
            .directory
            .add_user_session(entry.clone(), principal.clone(), Arc::clone(&transport))
            .is_some();
        if let Err(e) = self.publish_user(&entry).await {
            if self.directory.remove_user_if(&id, &transport) && replaced {
                gauge!(SESSIONS_ACTIVE, "kind" => ConnectionKind::EndUser.as_str()).decrement(1.0);
            }
            self.restore_user_field(&entry).await;
            return Err(e.into());
        }

        info!(user_id = principal.user_id, tenant_id = principal.tenant_id, "end-user session registered");
        counter!(REGISTRATIONS_TOTAL, "kind" => ConnectionKind::EndUser.as_str()).increment(1);
        if !replaced {
            gauge!(SESSIONS_ACTIVE, "kind" => ConnectionKind::EndUser.as_str()).increment(1.0);
        }
        Ok(principal)
    }

    /// Point the user's cache field back at a connection that is still
    /// registered here, or drop it if the failed entry was the last one.
    ///
    /// Called with the user lock held. Failures are logged only.
    async fn restore_user_field(&self, failed: &UserSessionEntry) {
        let survivor = self
            .directory
            .connections_for_user(failed.user_id)
            .into_iter()
            .find_map(|id| self.directory.user_session(&id))
            .map(|session| session.entry);
        let restored = match &survivor {
            Some(entry) => self.cache.refresh_user_session(entry).await,
            None => self.cache.forget_user_session(failed).await.map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(
                user_id = failed.user_id,
                survivor = survivor.is_some(),
                error = %e,
                "could not restore user cache field after rollback"
            );
        }
    }

    /// Register a group connection. No identity call is made.
    pub async fn register_group(
        &self,
        id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) -> Result<(), LifecycleError> {
        let group = transport
            .attributes()
            .group()
            .ok_or(LifecycleError::Unclassified)?
            .to_owned();
        let entry = GroupSessionEntry::new(id.clone(), group, self.directory.broker_id().clone());

        let _guard = self.acquire(&self.group_lock, ConnectionKind::GroupSecret).await?;
        let replaced = self
            .directory
            .add_group_session(entry.clone(), Arc::clone(&transport))
            .is_some();
        if let Err(e) = self.cache.refresh_group_session(&entry).await {
            if self.directory.remove_group_if(&id, &transport) && replaced {
                gauge!(SESSIONS_ACTIVE, "kind" => ConnectionKind::GroupSecret.as_str()).decrement(1.0);
            }
            return Err(e.into());
        }

        info!(group = %entry.group, "group session registered");
        counter!(REGISTRATIONS_TOTAL, "kind" => ConnectionKind::GroupSecret.as_str()).increment(1);
        if !replaced {
            gauge!(SESSIONS_ACTIVE, "kind" => ConnectionKind::GroupSecret.as_str()).increment(1.0);
        }
        Ok(())
    }

    /// Drop a closed connection from the local directory.
    ///
    /// Shared-cache entries are left to expire; see the reconciliation task.
    pub fn on_close(&self, id: &ConnectionId) -> Option<ConnectionKind> {
        let kind = self.directory.remove(id);
        if let Some(kind) = kind {
            gauge!(SESSIONS_ACTIVE, "kind" => kind.as_str()).decrement(1.0);
            info!(conn_id = %id, kind = kind.as_str(), "session removed");
        }
        kind
    }

    /// Handle a transport error: close the transport and deregister.
    pub fn on_transport_error(
        &self,
        transport: &dyn Transport,
        error: &dyn std::fmt::Display,
    ) -> Option<ConnectionKind> {
        warn!(error = %error, "transport error");
        close_quietly(transport);
        transport
            .underlying_connection_id()
            .and_then(|id| self.on_close(&id))
    }

    /// Re-publish every local registration to the shared cache.
    ///
    /// Takes the registration lock per entry rather than for the whole pass,
    /// so a new connection waits for at most one publish. An entry closed
    /// since the snapshot is skipped. Returns the number of user and group
    /// entries written.
    pub async fn republish(&self) -> Result<(usize, usize), CacheError> {
        let mut users = 0;
        for snapshot in self.directory.user_entries() {
            let _guard = self.user_lock.lock().await;
            let Some(session) = self.directory.user_session(&snapshot.connection_id) else {
                continue;
            };
            self.publish_user(&session.entry).await?;
            users += 1;
        }
        let mut groups = 0;
        for snapshot in self.directory.group_entries() {
            let _guard = self.group_lock.lock().await;
            let Some(session) = self.directory.group_session(&snapshot.connection_id) else {
                continue;
            };
            self.cache.refresh_group_session(&session.entry).await?;
            groups += 1;
        }
        Ok((users, groups))
    }

    async fn publish_user(&self, entry: &UserSessionEntry) -> Result<(), CacheError> {
        self.cache.refresh_user_session(entry).await?;
        self.cache.refresh_session_user(entry).await
    }

    async fn acquire<'a>(
        &self,
        lock: &'a Mutex<()>,
        kind: ConnectionKind,
    ) -> Result<MutexGuard<'a, ()>, LifecycleError> {
        if let Ok(guard) = tokio::time::timeout(self.lock_timeout, lock.lock()).await {
            Ok(guard)
        } else {
            counter!(REGISTRATION_TIMEOUTS_TOTAL, "kind" => kind.as_str()).increment(1);
            Err(LifecycleError::LockTimeout(self.lock_timeout))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SockJsSession;
    use crate::test_helpers::{FailingStore, FakeAuthenticator, FlakyStore, make_connection};
    use assert_matches::assert_matches;
    use conduit_core::logging::capture_logs;
    use conduit_core::{BrokerId, FailureKind};
    use conduit_directory::{CacheStore, MemoryStore};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use proptest::prelude::*;
    use tracing::Level;

    const TTL: Duration = Duration::from_secs(60);

    fn controller_with(store: Arc<dyn CacheStore>, lock_timeout: Duration) -> LifecycleController {
        let auth = FakeAuthenticator::default().with("tok-1", 42, 7, Some(3));
        LifecycleController::new(
            Arc::new(auth),
            Arc::new(LocalDirectory::new(BrokerId::from("node-A"))),
            SessionCache::new(store, "test", TTL),
            lock_timeout,
        )
    }

    fn controller() -> LifecycleController {
        controller_with(Arc::new(MemoryStore::new()), Duration::from_secs(10))
    }

    fn user_attrs(token: &str) -> HandshakeAttributes {
        HandshakeAttributes::new().with("token", token)
    }

    fn group_attrs(group: &str) -> HandshakeAttributes {
        HandshakeAttributes::new()
            .with("secretKey", "s3cret")
            .with("group", group)
    }

    fn node_a() -> BrokerId {
        BrokerId::from("node-A")
    }

    // ── classify ────────────────────────────────────────────────────

    #[test]
    fn classify_token_is_end_user() {
        assert_eq!(classify(&user_attrs("tok-1")).unwrap(), ConnectionKind::EndUser);
    }

    #[test]
    fn classify_secret_and_group_is_group() {
        assert_eq!(
            classify(&group_attrs("grp-x")).unwrap(),
            ConnectionKind::GroupSecret
        );
    }

    #[test]
    fn classify_token_wins_over_group() {
        let attrs = group_attrs("grp-x").with("token", "tok-1");
        assert_eq!(classify(&attrs).unwrap(), ConnectionKind::EndUser);
    }

    #[test]
    fn classify_rejects_partial_and_empty() {
        let secret_only = HandshakeAttributes::new().with("secretKey", "s");
        let group_only = HandshakeAttributes::new().with("group", "g");
        let empty_token = HandshakeAttributes::new().with("token", "");
        let empty_group = HandshakeAttributes::new().with("secretKey", "s").with("group", "");
        for attrs in [secret_only, group_only, empty_token, empty_group, HandshakeAttributes::new()] {
            assert_matches!(classify(&attrs), Err(LifecycleError::Unclassified));
        }
    }

    fn unclassifiable() -> impl Strategy<Value = HandshakeAttributes> {
        let noise = prop::collection::btree_map("[a-zA-Z]{1,10}", "[ -~]{0,12}", 0..6);
        let half_group = prop::option::of(prop_oneof![Just("secretKey"), Just("group")]);
        (noise, half_group, "[ -~]{0,12}").prop_map(|(noise, half, value)| {
            let mut attrs: HandshakeAttributes = noise
                .into_iter()
                .filter(|(k, _)| k != "token" && k != "secretKey" && k != "group")
                .collect();
            if let Some(key) = half {
                attrs = attrs.with(key, value);
            }
            attrs
        })
    }

    proptest! {
        #[test]
        fn attributes_matching_no_kind_always_reject(attrs in unclassifiable()) {
            prop_assert!(matches!(classify(&attrs), Err(LifecycleError::Unclassified)));
        }

        #[test]
        fn any_token_is_end_user(token in "[!-~]{1,40}", group in "[a-z]{0,8}") {
            let attrs = group_attrs(&group).with("token", token);
            prop_assert_eq!(classify(&attrs).unwrap(), ConnectionKind::EndUser);
        }
    }

    // ── on_open ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn end_user_registers_locally_and_in_cache() {
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", user_attrs("tok-1"));

        let state = ctl.on_open(conn.clone()).await;

        assert_eq!(state, ConnectionState::EndUserActive);
        assert!(!conn.is_closed());
        assert_eq!(ctl.directory().kind_of(&conn.id), Some(ConnectionKind::EndUser));
        assert_eq!(ctl.directory().group_count(), 0);

        let users = ctl.cache().user_sessions(&node_a()).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].connection_id.as_str(), "c1");
        assert_eq!(users[0].tenant_id, 7);
        assert_eq!(users[0].user_id, 42);
        assert_eq!(users[0].role_id, Some(3));
        assert_eq!(users[0].owner.as_str(), "node-A");
        assert!(ctl.cache().group_sessions(&node_a()).await.unwrap().is_empty());

        let reverse = ctl.cache().session_user(&conn.id).await.unwrap().unwrap();
        assert_eq!(reverse.user_id, 42);
    }

    #[tokio::test]
    async fn group_registers_without_identity_call() {
        let auth = Arc::new(FakeAuthenticator::default());
        let ctl = LifecycleController::new(
            auth.clone(),
            Arc::new(LocalDirectory::new(node_a())),
            SessionCache::new(Arc::new(MemoryStore::new()), "test", TTL),
            Duration::from_secs(10),
        );
        let (conn, _rx) = make_connection("g1", group_attrs("grp-x"));

        assert_eq!(ctl.on_open(conn.clone()).await, ConnectionState::GroupActive);

        assert_eq!(auth.call_count(), 0);
        assert_eq!(ctl.directory().kind_of(&conn.id), Some(ConnectionKind::GroupSecret));
        let groups = ctl.cache().group_sessions(&node_a()).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, "grp-x");
        assert!(ctl.cache().user_sessions(&node_a()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unclassified_is_closed_without_writes() {
        let (logs, _guard) = capture_logs();
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", HandshakeAttributes::new().with("group", "g"));

        assert_eq!(ctl.on_open(conn.clone()).await, ConnectionState::Closed);
        // A retry creates nothing either.
        assert_eq!(ctl.on_open(conn.clone()).await, ConnectionState::Closed);

        assert!(conn.is_closed());
        assert!(!ctl.directory().contains(&conn.id));
        assert!(ctl.cache().user_sessions(&node_a()).await.unwrap().is_empty());
        assert!(ctl.cache().group_sessions(&node_a()).await.unwrap().is_empty());
        assert!(logs.has_event(Level::DEBUG, "connection rejected"));
        // The second close failed and was only logged.
        assert!(logs.has_event(Level::DEBUG, "close failed"));
    }

    #[tokio::test]
    async fn unbound_wrapper_is_rejected() {
        let ctl = controller();
        let session: Arc<dyn Transport> = Arc::new(SockJsSession::unbound(user_attrs("tok-1")));

        assert_eq!(ctl.on_open(session).await, ConnectionState::Closed);
        assert_eq!(ctl.directory().user_count(), 0);
    }

    #[tokio::test]
    async fn bound_wrapper_registers_underlying_connection() {
        let ctl = controller();
        let (conn, _rx) = make_connection("c9", user_attrs("tok-1"));
        let session: Arc<dyn Transport> = Arc::new(SockJsSession::bound(conn.clone()));

        assert_eq!(ctl.on_open(session).await, ConnectionState::EndUserActive);
        assert!(ctl.directory().contains(&conn.id));
    }

    #[tokio::test]
    async fn relayed_session_is_routed_like_a_direct_one() {
        let ctl = controller();
        let (conn, mut rx) = make_connection("c9", user_attrs("tok-1"));
        let session: Arc<dyn Transport> = Arc::new(SockJsSession::bound(conn.clone()));
        assert_eq!(ctl.on_open(session).await, ConnectionState::EndUserActive);

        let text = Arc::new("hello".to_owned());
        assert_eq!(ctl.directory().send_to_user(42, &text), 1);
        assert_eq!(rx.recv().await.unwrap().as_str(), "hello");

        assert_eq!(ctl.on_close(&conn.id), Some(ConnectionKind::EndUser));
        assert_eq!(ctl.directory().user_count(), 0);
    }

    #[tokio::test]
    async fn failed_authentication_rejects() {
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", user_attrs("bogus"));

        assert_eq!(ctl.on_open(conn.clone()).await, ConnectionState::Closed);
        assert!(conn.is_closed());
        assert_eq!(ctl.directory().user_count(), 0);
    }

    #[tokio::test]
    async fn register_user_reports_auth_error() {
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", user_attrs("bogus"));
        let err = ctl.register_user(conn.id.clone(), conn).await.unwrap_err();
        assert_matches!(err, LifecycleError::Auth(_));
        assert_eq!(err.kind(), FailureKind::Authentication);
    }

    #[tokio::test]
    async fn cache_failure_rolls_back_local_entry() {
        let ctl = controller_with(Arc::new(FailingStore), Duration::from_secs(10));
        let (user, _rx1) = make_connection("c1", user_attrs("tok-1"));
        let (group, _rx2) = make_connection("g1", group_attrs("grp-x"));

        assert_eq!(ctl.on_open(user.clone()).await, ConnectionState::Closed);
        assert_eq!(ctl.on_open(group.clone()).await, ConnectionState::Closed);

        assert!(user.is_closed());
        assert!(group.is_closed());
        assert_eq!(ctl.directory().user_count(), 0);
        assert_eq!(ctl.directory().group_count(), 0);

        let (other, _rx3) = make_connection("c2", user_attrs("tok-1"));
        let err = ctl.register_user(other.id.clone(), other).await.unwrap_err();
        assert_matches!(err, LifecycleError::Cache(CacheError::Unavailable(_)));
    }

    #[tokio::test]
    async fn failed_second_device_keeps_first_in_cache() {
        let store = Arc::new(FlakyStore::default());
        let ctl = controller_with(store.clone(), Duration::from_secs(10));
        let (phone, _rx1) = make_connection("c1", user_attrs("tok-1"));
        let (laptop, _rx2) = make_connection("c2", user_attrs("tok-1"));
        assert_eq!(ctl.on_open(phone).await, ConnectionState::EndUserActive);

        // The bucket write lands, the reverse-key write fails.
        store.fail_puts(true);
        assert_eq!(ctl.on_open(laptop.clone()).await, ConnectionState::Closed);

        assert!(laptop.is_closed());
        assert_eq!(ctl.directory().connections_for_user(42), vec![ConnectionId::from("c1")]);
        let cached = ctl.cache().user_sessions(&node_a()).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].connection_id.as_str(), "c1");
        let located = ctl.cache().locate_user(42).await.unwrap();
        assert!(located.iter().all(|e| e.connection_id.as_str() == "c1"));
    }

    #[tokio::test]
    async fn failed_sole_device_leaves_no_cache_field() {
        let store = Arc::new(FlakyStore::default());
        store.fail_puts(true);
        let ctl = controller_with(store, Duration::from_secs(10));
        let (conn, _rx) = make_connection("c1", user_attrs("tok-1"));

        assert_eq!(ctl.on_open(conn.clone()).await, ConnectionState::Closed);

        assert_eq!(ctl.directory().user_count(), 0);
        assert!(ctl.cache().user_sessions(&node_a()).await.unwrap().is_empty());
        assert!(ctl.cache().session_user(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_timeout_leaves_connection_open_and_unregistered() {
        let (logs, _guard) = capture_logs();
        let ctl = controller_with(Arc::new(MemoryStore::new()), Duration::from_millis(50));
        let (conn, _rx) = make_connection("c1", user_attrs("tok-1"));

        let held = ctl.user_lock.lock().await;
        let state = ctl.on_open(conn.clone()).await;
        drop(held);

        assert_eq!(state, ConnectionState::Unregistered);
        assert!(!conn.is_closed());
        assert!(!ctl.directory().contains(&conn.id));
        assert!(logs.has_event(Level::WARN, "registration abandoned"));
    }

    #[tokio::test]
    async fn kinds_do_not_contend() {
        let ctl = controller_with(Arc::new(MemoryStore::new()), Duration::from_millis(50));
        let (conn, _rx) = make_connection("g1", group_attrs("grp-x"));

        let _held = ctl.user_lock.lock().await;
        assert_eq!(ctl.on_open(conn).await, ConnectionState::GroupActive);
    }

    #[tokio::test]
    async fn racing_group_registrations_both_succeed() {
        let ctl = Arc::new(controller());
        let (a, _rx1) = make_connection("g1", group_attrs("grp-x"));
        let (b, _rx2) = make_connection("g2", group_attrs("grp-x"));

        let (sa, sb) = tokio::join!(ctl.on_open(a.clone()), ctl.on_open(b.clone()));

        assert_eq!(sa, ConnectionState::GroupActive);
        assert_eq!(sb, ConnectionState::GroupActive);
        let mut local = ctl.directory().connections_for_group("grp-x");
        local.sort();
        assert_eq!(local, vec![ConnectionId::from("g1"), ConnectionId::from("g2")]);

        let cached = ctl.cache().group_sessions(&node_a()).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert!(["g1", "g2"].contains(&cached[0].connection_id.as_str()));
    }

    #[tokio::test]
    async fn same_user_on_two_devices() {
        let ctl = controller();
        let (phone, _rx1) = make_connection("c1", user_attrs("tok-1"));
        let (laptop, _rx2) = make_connection("c2", user_attrs("tok-1"));

        let _ = ctl.on_open(phone).await;
        let _ = ctl.on_open(laptop).await;

        assert_eq!(ctl.directory().connections_for_user(42).len(), 2);
        assert_eq!(ctl.cache().user_sessions(&node_a()).await.unwrap().len(), 1);
    }

    fn active_sessions(handle: &PrometheusHandle, kind: &str) -> Option<f64> {
        let prefix = format!("{SESSIONS_ACTIVE}{{kind=\"{kind}\"}} ");
        handle
            .render()
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()).map(str::to_owned))
            .and_then(|value| value.trim().parse().ok())
    }

    #[tokio::test]
    async fn reregistering_a_connection_counts_once() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _local = metrics::set_default_local_recorder(&recorder);
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", user_attrs("tok-1"));
        let transport: Arc<dyn Transport> = conn.clone();

        let _ = ctl.register_user(conn.id.clone(), Arc::clone(&transport)).await.unwrap();
        let _ = ctl.register_user(conn.id.clone(), transport).await.unwrap();
        assert_eq!(ctl.directory().user_count(), 1);
        assert_eq!(active_sessions(&handle, "end_user"), Some(1.0));

        let _ = ctl.on_close(&conn.id);
        assert_eq!(active_sessions(&handle, "end_user"), Some(0.0));
    }

    // ── close ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_removes_local_entry_only() {
        let ctl = controller();
        let (conn, _rx) = make_connection("c1", user_attrs("tok-1"));
        let _ = ctl.on_open(conn.clone()).await;

        assert_eq!(ctl.on_close(&conn.id), Some(ConnectionKind::EndUser));
        assert_eq!(ctl.on_close(&conn.id), None);

        assert!(!ctl.directory().contains(&conn.id));
        assert_eq!(ctl.cache().user_sessions(&node_a()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_closes_and_deregisters() {
        let ctl = controller();
        let (conn, _rx) = make_connection("g1", group_attrs("grp-x"));
        let _ = ctl.on_open(conn.clone()).await;

        let kind = ctl.on_transport_error(conn.as_ref(), &"connection reset");

        assert_eq!(kind, Some(ConnectionKind::GroupSecret));
        assert!(conn.is_closed());
        assert_eq!(ctl.directory().group_count(), 0);
    }

    // ── republish ───────────────────────────────────────────────────

    #[tokio::test]
    async fn republish_writes_every_live_session() {
        let store = Arc::new(MemoryStore::new());
        let ctl = controller_with(store.clone(), Duration::from_secs(10));
        let (u, _rx1) = make_connection("c1", user_attrs("tok-1"));
        let (g, _rx2) = make_connection("g1", group_attrs("grp-x"));
        let _ = ctl.on_open(u).await;
        let _ = ctl.on_open(g).await;

        // Wipe the cache, as if every entry had expired.
        let _ = store.delete("test:brokerUserSession:node-A").await.unwrap();
        let _ = store.delete("test:brokerServerSession:node-A").await.unwrap();

        assert_eq!(ctl.republish().await.unwrap(), (1, 1));
        assert_eq!(ctl.cache().user_sessions(&node_a()).await.unwrap().len(), 1);
        assert_eq!(ctl.cache().group_sessions(&node_a()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn republish_skips_closed_sessions() {
        let ctl = controller();
        let (u, _rx1) = make_connection("c1", user_attrs("tok-1"));
        let (g, _rx2) = make_connection("g1", group_attrs("grp-x"));
        let _ = ctl.on_open(u.clone()).await;
        let _ = ctl.on_open(g).await;
        let _ = ctl.on_close(&u.id);

        assert_eq!(ctl.republish().await.unwrap(), (0, 1));
    }

    #[tokio::test]
    async fn registration_proceeds_during_long_republish() {
        let store = Arc::new(FlakyStore::with_write_delay(Duration::from_millis(10)));
        let ctl = Arc::new(controller_with(store, Duration::from_millis(100)));
        let mut queues = Vec::new();
        for i in 0..30 {
            let (conn, rx) = make_connection(&format!("g{i}"), group_attrs(&format!("grp-{i}")));
            assert_eq!(ctl.on_open(conn).await, ConnectionState::GroupActive);
            queues.push(rx);
        }

        // A full pass takes about 300ms, well past the lock timeout.
        let pass = tokio::spawn({
            let ctl = Arc::clone(&ctl);
            async move { ctl.republish().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (late, _rx) = make_connection("late", group_attrs("grp-late"));
        assert_eq!(ctl.on_open(late).await, ConnectionState::GroupActive);
        assert_eq!(pass.await.unwrap().unwrap(), (0, 30));
    }
}
