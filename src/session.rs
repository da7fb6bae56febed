//! Ref-counted, latest-value-replay session wiring.
//!
//! Every caller that needs the shared peer connection calls
//! [`SessionCoordinator::acquire`]. The first caller pays the cost of
//! creating a session and a peer connection; every later caller while at
//! least one handle is outstanding gets the same [`Session`] back
//! immediately. When the last handle drops, the peer connection is torn
//! down and the next `acquire` starts a fresh session. A [`watch`] channel
//! plays the role of a single-slot replay subject: new subscribers that only
//! want to observe the session (not hold a reference to it open) can clone
//! [`SessionCoordinator::watch`] instead of acquiring a handle.
//!
//! A background watcher is attached to every session's connection-state and
//! ICE-state channels. `failed`/`closed` on either one is treated as fatal
//! and rebuilds `(peerConnection, sessionId)` from scratch through
//! [`retry_with_backoff`]; an ICE state of `disconnected` starts a 7-second
//! probation timer (cancelled by any later ICE state change) and only
//! rebuilds if the connection has not recovered to `connected` by the time
//! it fires. The watcher never rebuilds a session nobody is holding a
//! handle to -- that case is left to the ordinary last-handle-drop teardown.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use partytracks_webrtc::{
    BundlePolicy, ConnectionState, IceConnectionState, IceServer, PeerConnection, PeerConnectionFactory,
    RtcConfiguration,
};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::error::PartyTracksError;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::sfu_client::SfuClient;

const ICE_DISCONNECTED_PROBATION: Duration = Duration::from_secs(7);

pub struct Session {
    pub session_id: String,
    pub peer_connection: Arc<dyn PeerConnection>,
}

struct CoordinatorState {
    session: Option<Arc<Session>>,
    generation: u64,
    handle_count: usize,
}

struct Inner {
    sfu: Arc<SfuClient>,
    factory: Arc<dyn PeerConnectionFactory>,
    retry: RetryConfig,
    state_tx: watch::Sender<Option<Arc<Session>>>,
    state_rx: watch::Receiver<Option<Arc<Session>>>,
    state: StdMutex<CoordinatorState>,
    create_lock: AsyncMutex<()>,
}

#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(sfu: Arc<SfuClient>, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self::with_retry(sfu, factory, RetryConfig::default())
    }

    #[must_use]
    pub fn with_retry(sfu: Arc<SfuClient>, factory: Arc<dyn PeerConnectionFactory>, retry: RetryConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                sfu,
                factory,
                retry,
                state_tx,
                state_rx,
                state: StdMutex::new(CoordinatorState { session: None, generation: 0, handle_count: 0 }),
                create_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Observe the shared session without keeping it alive. Mirrors
    /// `shareReplay`'s bufferSize-1 behavior: a fresh subscriber immediately
    /// sees the latest value, `None` if nothing is currently open.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Arc<Session>>> {
        self.inner.state_rx.clone()
    }

    /// Acquire a strong reference to the shared session, creating one if
    /// none is currently open. Dropping the returned [`SessionHandle`]
    /// releases the reference; the underlying peer connection closes once
    /// every handle has been dropped.
    pub async fn acquire(&self) -> Result<SessionHandle, PartyTracksError> {
        let _create_guard = self.inner.create_lock.lock().await;

        let needs_create = self.inner.state.lock().unwrap().session.is_none();
        if needs_create {
            let session = self.create_session_with_retry().await?;
            self.publish_session(session);
        }

        let mut state = self.inner.state.lock().unwrap();
        state.handle_count += 1;
        let generation = state.generation;
        let session = state.session.clone().expect("session was just created");
        drop(state);

        Ok(SessionHandle { session, _guard: Arc::new(ReleaseGuard { coordinator: self.clone(), generation }) })
    }

    async fn create_session(&self) -> Result<Session, PartyTracksError> {
        let new_session = self.inner.sfu.new_session().await?;
        let ice = self.inner.sfu.generate_ice_servers().await?;
        let peer_connection = self
            .inner
            .factory
            .create(RtcConfiguration {
                ice_servers: ice
                    .ice_servers
                    .into_iter()
                    .map(|s| IceServer { urls: s.urls, username: s.username, credential: s.credential })
                    .collect(),
                bundle_policy: BundlePolicy::MaxBundle,
            })
            .await?;
        Ok(Session { session_id: new_session.session_id, peer_connection })
    }

    async fn create_session_with_retry(&self) -> Result<Session, PartyTracksError> {
        let this = self.clone();
        retry_with_backoff(&self.inner.retry, move || {
            let this = this.clone();
            async move { this.create_session().await }
        })
        .await
    }

    /// Publish a newly created session as the current generation and attach
    /// its failure/recovery watcher.
    fn publish_session(&self, session: Session) {
        let peer_connection = session.peer_connection.clone();
        let session = Arc::new(session);

        let mut state = self.inner.state.lock().unwrap();
        state.generation += 1;
        let generation = state.generation;
        state.handle_count = 0;
        state.session = Some(session.clone());
        drop(state);

        let _ = self.inner.state_tx.send(Some(session));
        self.spawn_fatal_watcher(peer_connection, generation);
    }

    fn release(&self, generation: u64) {
        let mut state = self.inner.state.lock().unwrap();
        if state.generation != generation {
            // This handle belonged to a session generation a rebuild already
            // superseded; that rebuild already closed its peer connection.
            return;
        }
        state.handle_count -= 1;
        if state.handle_count == 0 {
            let peer_connection = state.session.take().map(|s| s.peer_connection.clone());
            drop(state);
            if let Some(peer_connection) = peer_connection {
                tokio::spawn(async move {
                    let _ = peer_connection.close().await;
                });
            }
            let _ = self.inner.state_tx.send(None);
        }
    }

    /// Watches one session generation's connection/ICE state for fatal
    /// events and drives a rebuild. Exits as soon as it observes one fatal
    /// event (the rebuilt generation, if any, gets its own fresh watcher).
    fn spawn_fatal_watcher(&self, peer_connection: Arc<dyn PeerConnection>, generation: u64) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut connection_states = peer_connection.subscribe_connection_state();
            let mut ice_states = peer_connection.subscribe_ice_connection_state();
            let mut probation_deadline: Option<tokio::time::Instant> = None;

            loop {
                let probation = async {
                    match probation_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    changed = connection_states.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if matches!(*connection_states.borrow(), ConnectionState::Failed | ConnectionState::Closed) {
                            coordinator.rebuild_if_current(generation).await;
                            return;
                        }
                    }
                    changed = ice_states.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let ice_state = *ice_states.borrow();
                        match ice_state {
                            IceConnectionState::Failed | IceConnectionState::Closed => {
                                coordinator.rebuild_if_current(generation).await;
                                return;
                            }
                            IceConnectionState::Disconnected => {
                                probation_deadline = Some(tokio::time::Instant::now() + ICE_DISCONNECTED_PROBATION);
                            }
                            _ => {
                                probation_deadline = None;
                            }
                        }
                    }
                    () = probation, if probation_deadline.is_some() => {
                        if peer_connection.ice_connection_state() != IceConnectionState::Connected {
                            coordinator.rebuild_if_current(generation).await;
                            return;
                        }
                        probation_deadline = None;
                    }
                }
            }
        });
    }

    /// Rebuild the session if `generation` is still current. A generation
    /// nobody holds a handle to is simply dropped, matching the
    /// last-ref-unsubscribe rule ("close, no rebuild").
    async fn rebuild_if_current(&self, generation: u64) {
        let _create_guard = self.inner.create_lock.lock().await;

        let (stale_peer_connection, should_rebuild) = {
            let state = self.inner.state.lock().unwrap();
            if state.generation != generation {
                (None, false)
            } else {
                let pc = state.session.as_ref().map(|s| s.peer_connection.clone());
                let should_rebuild = pc.is_some() && state.handle_count > 0;
                (pc, should_rebuild)
            }
        };

        let Some(stale_peer_connection) = stale_peer_connection else {
            return;
        };
        tokio::spawn(async move {
            let _ = stale_peer_connection.close().await;
        });

        if !should_rebuild {
            self.clear_generation(generation);
            return;
        }

        match self.create_session_with_retry().await {
            Ok(session) => self.publish_session(session),
            Err(_) => self.clear_generation(generation),
        }
    }

    fn clear_generation(&self, generation: u64) {
        let mut state = self.inner.state.lock().unwrap();
        if state.generation == generation {
            state.session = None;
        }
        drop(state);
        let _ = self.inner.state_tx.send(None);
    }
}

struct ReleaseGuard {
    coordinator: SessionCoordinator,
    generation: u64,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.generation);
    }
}

/// An outstanding reference to the shared session. Holding one keeps the
/// peer connection alive; drop it (or call [`SessionHandle::release`]
/// explicitly) when done. Cloning shares the same underlying reference --
/// the session is only released once every clone has been dropped.
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<Session>,
    _guard: Arc<ReleaseGuard>,
}

impl SessionHandle {
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use crate::sfu_client::{HttpFetcher, SfuClient};
    use async_trait::async_trait;
    use partytracks_test_utils::{MockPeerConnection, MockPeerConnectionFactory};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct ScriptedFetcher {
        responses: Mutex<Vec<(u16, serde_json::Value)>>,
    }

    #[async_trait]
    impl HttpFetcher for ScriptedFetcher {
        async fn get(&self, _url: &str) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn post(&self, _url: &str, _body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn put(&self, _url: &str, _body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    fn coordinator_with_responses(responses: Vec<(u16, serde_json::Value)>) -> SessionCoordinator {
        let fetcher = Arc::new(ScriptedFetcher { responses: Mutex::new(responses) });
        let sfu = Arc::new(SfuClient::new("https://sfu.example.com", fetcher, Arc::new(History::new(10))));
        let retry = RetryConfig { initial_delay: StdDuration::from_millis(1), ..RetryConfig::default() };
        SessionCoordinator::with_retry(sfu, Arc::new(MockPeerConnectionFactory), retry)
    }

    fn session_script() -> Vec<(u16, serde_json::Value)> {
        vec![
            (200, serde_json::json!({"sessionId": "s1"})),
            (200, serde_json::json!({"iceServers": []})),
        ]
    }

    #[tokio::test]
    async fn second_acquire_reuses_the_first_session() {
        let coordinator = coordinator_with_responses(session_script());
        let a = coordinator.acquire().await.unwrap();
        let b = coordinator.acquire().await.unwrap();
        assert_eq!(a.session.session_id, b.session.session_id);
    }

    #[tokio::test]
    async fn session_is_recreated_after_every_handle_drops() {
        let coordinator = coordinator_with_responses({
            let mut script = session_script();
            script.extend(vec![
                (200, serde_json::json!({"sessionId": "s2"})),
                (200, serde_json::json!({"iceServers": []})),
            ]);
            script
        });

        let first_id = {
            let handle = coordinator.acquire().await.unwrap();
            handle.session.session_id.clone()
        };
        // handle dropped here, refcount back to zero

        let second = coordinator.acquire().await.unwrap();
        assert_eq!(first_id, "s1");
        assert_eq!(second.session.session_id, "s2");
    }

    #[tokio::test]
    async fn watch_reports_none_until_a_handle_is_acquired() {
        let coordinator = coordinator_with_responses(session_script());
        let watch = coordinator.watch();
        assert!(watch.borrow().is_none());
        let _handle = coordinator.acquire().await.unwrap();
        assert!(watch.borrow().is_some());
    }

    #[tokio::test]
    async fn fatal_connection_state_rebuilds_while_a_handle_is_outstanding() {
        let coordinator = coordinator_with_responses({
            let mut script = session_script();
            script.extend(vec![
                (200, serde_json::json!({"sessionId": "s2"})),
                (200, serde_json::json!({"iceServers": []})),
            ]);
            script
        });

        let handle = coordinator.acquire().await.unwrap();
        let mock = handle.session.peer_connection.as_any().downcast_ref::<MockPeerConnection>().unwrap();
        mock.set_connection_state(ConnectionState::Failed);

        let mut watch = coordinator.watch();
        tokio::time::timeout(StdDuration::from_secs(1), async {
            loop {
                watch.changed().await.unwrap();
                if let Some(session) = watch.borrow().clone() {
                    if session.session_id == "s2" {
                        return;
                    }
                }
            }
        })
        .await
        .expect("coordinator should rebuild onto a new session");
    }

    #[tokio::test]
    async fn fatal_event_with_no_outstanding_handle_just_closes() {
        let coordinator = coordinator_with_responses(session_script());
        let handle = coordinator.acquire().await.unwrap();
        let peer_connection = handle.session.peer_connection.clone();
        drop(handle);

        // No further SFU responses are scripted; a rebuild here would panic
        // on an empty response queue, proving none was attempted.
        peer_connection.close().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(coordinator.watch().borrow().is_none());
    }
}
