//! Tears down tracks (stops the local transceiver and tells the SFU to drop
//! its side), renegotiating the peer connection in one shot if the SFU
//! requires it.

use std::sync::Arc;

use partytracks_protocol::{CloseTrackRef, CloseTracksRequest, SdpType as WireSdpType, SessionDescriptionObject};
use partytracks_webrtc::{ConnectionState, SdpType, SessionDescription, Transceiver};

use crate::error::PartyTracksError;
use crate::scheduler::FifoScheduler;
use crate::session::SessionCoordinator;
use crate::sfu_client::SfuClient;

pub struct TrackCloseEngine {
    coordinator: SessionCoordinator,
    sfu: Arc<SfuClient>,
    scheduler: Arc<FifoScheduler>,
}

impl TrackCloseEngine {
    #[must_use]
    pub fn new(coordinator: SessionCoordinator, sfu: Arc<SfuClient>, scheduler: Arc<FifoScheduler>) -> Self {
        Self { coordinator, sfu, scheduler }
    }

    pub async fn close_tracks(&self, transceivers: Vec<Arc<dyn Transceiver>>, force: bool) -> Result<(), PartyTracksError> {
        if transceivers.is_empty() {
            return Ok(());
        }

        let handle = self.coordinator.acquire().await?;
        let peer_connection = handle.session.peer_connection.clone();
        let session_id = handle.session.session_id.clone();

        let refs: Vec<CloseTrackRef> =
            transceivers.iter().filter_map(|t| t.mid().map(|mid| CloseTrackRef { mid })).collect();

        for transceiver in &transceivers {
            transceiver.stop().await?;
        }

        // Nothing left for the SFU to clean up: the connection is already
        // gone, and the session id will be reaped on its own.
        if peer_connection.connection_state() == ConnectionState::Closed {
            return Ok(());
        }

        let sfu = self.sfu.clone();
        let job_peer_connection = peer_connection.clone();
        self.scheduler
            .schedule(move || async move {
                let offer = job_peer_connection.create_offer().await?;
                job_peer_connection
                    .set_local_description(SessionDescription { sdp_type: SdpType::Offer, sdp: offer })
                    .await?;
                let local = job_peer_connection
                    .current_local_description()
                    .ok_or(PartyTracksError::SessionClosed)?;

                let response = sfu
                    .close_tracks(
                        &session_id,
                        CloseTracksRequest {
                            session_description: SessionDescriptionObject { sdp_type: WireSdpType::Offer, sdp: local.sdp },
                            tracks: refs,
                            force,
                        },
                    )
                    .await?;

                job_peer_connection
                    .set_remote_description(SessionDescription {
                        sdp_type: SdpType::Answer,
                        sdp: response.session_description.sdp,
                    })
                    .await?;

                Ok::<_, PartyTracksError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use crate::scheduler::FifoScheduler;
    use crate::session::SessionCoordinator;
    use crate::sfu_client::{HttpFetcher, SfuClient};
    use async_trait::async_trait;
    use partytracks_test_utils::{MockMediaStreamTrack, MockPeerConnectionFactory};
    use partytracks_webrtc::{TrackKind, TransceiverDirection};
    use std::sync::Mutex;

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

    fn engine_with_responses(responses: Vec<(u16, serde_json::Value)>) -> TrackCloseEngine {
        let fetcher = Arc::new(ScriptedFetcher { responses: Mutex::new(responses) });
        let sfu = Arc::new(SfuClient::new("https://sfu.example.com", fetcher, Arc::new(History::new(10))));
        let coordinator = SessionCoordinator::new(sfu.clone(), Arc::new(MockPeerConnectionFactory));
        TrackCloseEngine::new(coordinator, sfu, Arc::new(FifoScheduler::new()))
    }

    fn session_script() -> Vec<(u16, serde_json::Value)> {
        vec![
            (200, serde_json::json!({"sessionId": "s1"})),
            (200, serde_json::json!({"iceServers": []})),
        ]
    }

    #[tokio::test]
    async fn already_closed_connection_skips_the_round_trip() {
        let engine = engine_with_responses(session_script());
        let handle = engine.coordinator.acquire().await.unwrap();
        let track = MockMediaStreamTrack::new("a", TrackKind::Video);
        let transceiver =
            handle.session.peer_connection.add_transceiver(track, TransceiverDirection::Sendonly).await.unwrap();
        handle.session.peer_connection.close().await.unwrap();

        // No further SFU responses are scripted; a round trip here would
        // panic on an empty response queue.
        engine.close_tracks(vec![transceiver], false).await.unwrap();
    }
}
