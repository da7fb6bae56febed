//! Reactive WebRTC coordinator for a single SFU peer connection.
//!
//! [`PartyTracksClient`] owns one lazily-created peer connection per session
//! and wires three engines on top of it: [`PushTrackEngine`] for publishing
//! local media, [`PullTrackEngine`] for subscribing to remote media, and
//! [`TrackCloseEngine`] for tearing tracks back down. All three serialize
//! their SFU round trips through a single [`FifoScheduler`] so negotiation
//! never races itself.

mod close;
mod config;
mod dispatcher;
mod error;
mod history;
mod pull;
mod push;
mod retry;
mod scheduler;
mod session;
mod sfu_client;
mod track_metadata;

pub use close::TrackCloseEngine;
pub use config::{Config, ReconnectPolicy};
pub use dispatcher::BulkRequestDispatcher;
pub use error::PartyTracksError;
pub use history::History;
pub use pull::PullTrackEngine;
pub use push::PushTrackEngine;
pub use retry::{retry_with_backoff, RetryConfig};
pub use scheduler::FifoScheduler;
pub use session::{Session, SessionCoordinator, SessionHandle};
pub use sfu_client::{HttpFetcher, ReqwestFetcher, SfuClient};
pub use track_metadata::{PulledTrack, PushedTrack, TrackMetadata};

pub use partytracks_protocol as protocol;
pub use partytracks_webrtc as webrtc;
pub use partytracks_ws as signaling;

use std::sync::Arc;

use partytracks_protocol::SimulcastPreference;
use partytracks_webrtc::{MediaStreamTrack, PeerConnectionFactory, Transceiver};

/// Installs a `tracing-subscriber` formatter honoring `RUST_LOG`, defaulting
/// to `info` when unset. Call once at process start; safe to call more than
/// once, later calls are ignored.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Top-level facade wiring a [`SessionCoordinator`] to the push/pull/close
/// engines. Construct one per SFU connection.
pub struct PartyTracksClient {
    coordinator: SessionCoordinator,
    push: PushTrackEngine,
    pull: PullTrackEngine,
    close: TrackCloseEngine,
    history: Arc<History>,
}

impl PartyTracksClient {
    #[must_use]
    pub fn new(config: &Config, fetcher: Arc<dyn HttpFetcher>, peer_connection_factory: Arc<dyn PeerConnectionFactory>) -> Self {
        let history = Arc::new(History::new(config.history_capacity));
        let sfu = Arc::new(SfuClient::new(config.sfu_base_url.clone(), fetcher, history.clone()));
        let coordinator = SessionCoordinator::with_retry(sfu.clone(), peer_connection_factory, config.request_retry.clone());
        let scheduler = Arc::new(FifoScheduler::new());

        Self {
            push: PushTrackEngine::new(coordinator.clone(), sfu.clone(), scheduler.clone()),
            pull: PullTrackEngine::new(coordinator.clone(), sfu.clone(), scheduler.clone()),
            close: TrackCloseEngine::new(coordinator.clone(), sfu, scheduler),
            coordinator,
            history,
        }
    }

    pub async fn push_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<PushedTrack, PartyTracksError> {
        self.push.push_track(track).await
    }

    pub async fn pull_track(
        &self,
        track_name: impl Into<String>,
        remote_session_id: impl Into<String>,
        simulcast: Option<SimulcastPreference>,
    ) -> Result<PulledTrack, PartyTracksError> {
        self.pull.pull_track(track_name, remote_session_id, simulcast).await
    }

    /// Apply a new simulcast preference to an already-pulled track.
    pub async fn update_preferred_rid(&self, pulled: &PulledTrack, preferred_rid: String) -> Result<(), PartyTracksError> {
        self.pull.update_preferred_rid(pulled, preferred_rid).await
    }

    pub async fn close_tracks(&self, transceivers: Vec<Arc<dyn Transceiver>>, force: bool) -> Result<(), PartyTracksError> {
        self.close.close_tracks(transceivers, force).await
    }

    #[must_use]
    pub fn session_coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }
}
