//! Subscribes to remote tracks published by other session participants.
//!
//! Pull requests submitted in the same scheduling window are coalesced by a
//! [`BulkRequestDispatcher`] into a single `/tracks/new` call, then handed to
//! the session's [`FifoScheduler`] so the negotiation round trip does not
//! race a concurrent push or close.

use std::sync::Arc;
use std::time::Duration;

use partytracks_protocol::{
    Location, NewTracksRequest, RenegotiateRequest, SdpType as WireSdpType, SessionDescriptionObject,
    SimulcastPreference, TrackObject, UpdateTracksRequest,
};
use partytracks_webrtc::{PeerConnection, SdpType, SessionDescription, SignalingState, TrackEvent, Transceiver};
use tokio::sync::broadcast;

use crate::dispatcher::BulkRequestDispatcher;
use crate::error::PartyTracksError;
use crate::scheduler::FifoScheduler;
use crate::session::{SessionCoordinator, SessionHandle};
use crate::sfu_client::SfuClient;
use crate::track_metadata::{PulledTrack, TrackMetadata};

/// Caps how many pull requests one `/tracks/new` call absorbs before the
/// batch flushes immediately and opens a new one for the overflow.
const PULL_BATCH_CAPACITY: usize = 32;

#[derive(Clone)]
struct PullRequest {
    track_name: String,
    session_id: String,
    simulcast: Option<SimulcastPreference>,
}

pub struct PullTrackEngine {
    coordinator: SessionCoordinator,
    sfu: Arc<SfuClient>,
    scheduler: Arc<FifoScheduler>,
    dispatcher: BulkRequestDispatcher<PullRequest, Result<PulledTrack, PartyTracksError>>,
}

impl PullTrackEngine {
    #[must_use]
    pub fn new(coordinator: SessionCoordinator, sfu: Arc<SfuClient>, scheduler: Arc<FifoScheduler>) -> Self {
        let dispatcher = BulkRequestDispatcher::new(PULL_BATCH_CAPACITY, {
            let coordinator = coordinator.clone();
            let sfu = sfu.clone();
            let scheduler = scheduler.clone();
            move |requests: Vec<PullRequest>| {
                let coordinator = coordinator.clone();
                let sfu = sfu.clone();
                let scheduler = scheduler.clone();
                async move { flush_batch(coordinator, sfu, scheduler, requests).await }
            }
        });
        Self { coordinator, sfu, scheduler, dispatcher }
    }

    pub async fn pull_track(
        &self,
        track_name: impl Into<String>,
        remote_session_id: impl Into<String>,
        simulcast: Option<SimulcastPreference>,
    ) -> Result<PulledTrack, PartyTracksError> {
        let pulled = self
            .dispatcher
            .dispatch(PullRequest { track_name: track_name.into(), session_id: remote_session_id.into(), simulcast })
            .await?;

        spawn_rebuild_watcher(self.coordinator.clone(), self.sfu.clone(), self.scheduler.clone(), pulled.clone());
        Ok(pulled)
    }

    /// Apply a new simulcast preference to an already-pulled track. A
    /// preference identical to the one last sent is dropped rather than
    /// re-issuing an identical `/tracks/update` call.
    pub async fn update_preferred_rid(&self, pulled: &PulledTrack, preferred_rid: String) -> Result<(), PartyTracksError> {
        let preference = SimulcastPreference { preferred_rid };
        if pulled.current_simulcast().as_ref() == Some(&preference) {
            return Ok(());
        }

        let handle = self.coordinator.acquire().await?;
        let Some(mid) = pulled.transceiver().mid() else {
            return Err(PartyTracksError::TrackNotFound(pulled.metadata.track_name.clone()));
        };
        self.sfu
            .update_tracks(
                &handle.session.session_id,
                UpdateTracksRequest {
                    tracks: vec![TrackObject {
                        mid: Some(mid),
                        simulcast: Some(preference.clone()),
                        ..Default::default()
                    }],
                },
            )
            .await?;
        pulled.set_current_simulcast(Some(preference));
        Ok(())
    }
}

async fn flush_batch(
    coordinator: SessionCoordinator,
    sfu: Arc<SfuClient>,
    scheduler: Arc<FifoScheduler>,
    requests: Vec<PullRequest>,
) -> Vec<Result<PulledTrack, PartyTracksError>> {
    let handle = match coordinator.acquire().await {
        Ok(h) => h,
        Err(e) => return vec![Err(e); requests.len()],
    };

    match negotiate_pulls(&handle, &sfu, &scheduler, &requests).await {
        Ok(results) => results
            .into_iter()
            .map(|result| result.map(|(metadata, transceiver, track, simulcast)| PulledTrack::new(metadata, transceiver, track, simulcast, handle.clone())))
            .collect(),
        Err(e) => vec![Err(e); requests.len()],
    }
}

type PullOutcome = (TrackMetadata, Arc<dyn Transceiver>, Arc<dyn partytracks_webrtc::MediaStreamTrack>, Option<SimulcastPreference>);

/// Runs the actual negotiation for a batch of pull requests against an
/// already-acquired session: one `/tracks/new` call, an optional
/// renegotiation round trip, then waits for each track's transceiver.
async fn negotiate_pulls(
    handle: &SessionHandle,
    sfu: &Arc<SfuClient>,
    scheduler: &Arc<FifoScheduler>,
    requests: &[PullRequest],
) -> Result<Vec<Result<PullOutcome, PartyTracksError>>, PartyTracksError> {
    let peer_connection = handle.session.peer_connection.clone();
    let session_id = handle.session.session_id.clone();
    let mut track_events = peer_connection.subscribe_track_events();

    let track_objects: Vec<TrackObject> = requests
        .iter()
        .map(|r| TrackObject {
            location: Some(Location::Remote),
            track_name: Some(r.track_name.clone()),
            session_id: Some(r.session_id.clone()),
            simulcast: r.simulcast.clone(),
            ..Default::default()
        })
        .collect();

    let sfu_for_job = sfu.clone();
    let job_peer_connection = peer_connection.clone();
    let job_session_id = session_id.clone();
    let response = scheduler
        .schedule(move || async move {
            let response = sfu_for_job
                .new_tracks(&job_session_id, NewTracksRequest { session_description: None, tracks: track_objects })
                .await?;

            if response.is_error() {
                return Err(PartyTracksError::sfu(
                    response.error_code.unwrap_or_default(),
                    response.error_description.unwrap_or_default(),
                ));
            }

            // A pull only needs a second offer/answer round trip when the
            // SFU flags it as required (e.g. the first remote track on this
            // connection). Otherwise the existing SDP already covers it.
            if response.requires_immediate_renegotiation {
                if let Some(offer) = &response.session_description {
                    job_peer_connection
                        .set_remote_description(SessionDescription { sdp_type: SdpType::Offer, sdp: offer.sdp.clone() })
                        .await?;
                    let answer = job_peer_connection.create_answer().await?;
                    job_peer_connection
                        .set_local_description(SessionDescription { sdp_type: SdpType::Answer, sdp: answer.clone() })
                        .await?;
                    sfu_for_job
                        .renegotiate(
                            &job_session_id,
                            RenegotiateRequest {
                                session_description: SessionDescriptionObject { sdp_type: WireSdpType::Answer, sdp: answer },
                            },
                        )
                        .await?;
                    wait_for_stable(&job_peer_connection).await?;
                }
            }

            Ok::<_, PartyTracksError>(response)
        })
        .await?;

    let mut results = Vec::with_capacity(requests.len());
    for (request, track_entry) in requests.iter().zip(response.tracks.iter()) {
        if track_entry.is_error() {
            results.push(Err(PartyTracksError::sfu(
                track_entry.error_code.clone().unwrap_or_default(),
                track_entry.error_description.clone().unwrap_or_default(),
            )));
            continue;
        }
        let Some(mid) = track_entry.mid.clone() else {
            results.push(Err(PartyTracksError::TrackNotFound(request.track_name.clone())));
            continue;
        };
        match wait_for_transceiver_with_mid(&mid, &mut track_events).await {
            Some(transceiver) => {
                let track = transceiver.receiver().track();
                results.push(Ok((
                    TrackMetadata {
                        track_name: request.track_name.clone(),
                        session_id: Some(request.session_id.clone()),
                        location: Location::Remote,
                    },
                    transceiver,
                    track,
                    request.simulcast.clone(),
                )));
            }
            None => results.push(Err(PartyTracksError::Timeout)),
        }
    }
    Ok(results)
}

/// Watches the shared session for a rebuild and resubscribes from scratch:
/// the old transceiver is gone along with the closed peer connection, so the
/// only option is re-running the pull against the new session.
fn spawn_rebuild_watcher(coordinator: SessionCoordinator, sfu: Arc<SfuClient>, scheduler: Arc<FifoScheduler>, pulled: PulledTrack) {
    tokio::spawn(async move {
        let mut session_watch = coordinator.watch();
        let mut known_session_id = pulled.metadata.session_id.clone();
        let request = PullRequest {
            track_name: pulled.metadata.track_name.clone(),
            session_id: pulled.metadata.session_id.clone().unwrap_or_default(),
            simulcast: pulled.current_simulcast(),
        };

        loop {
            if session_watch.changed().await.is_err() {
                return;
            }
            let Some(session) = session_watch.borrow().clone() else { continue };
            if Some(session.session_id.clone()) == known_session_id {
                continue;
            }
            known_session_id = Some(session.session_id.clone());

            let handle = match coordinator.acquire().await {
                Ok(h) => h,
                Err(_) => continue,
            };
            match negotiate_pulls(&handle, &sfu, &scheduler, std::slice::from_ref(&request)).await {
                Ok(mut results) => {
                    if let Some(Ok((_, transceiver, track, _))) = results.pop() {
                        pulled.adopt_rebuilt_session(transceiver, track, handle);
                    }
                }
                Err(_) => {
                    // Next session change, if any, gets another attempt.
                }
            }
        }
    });
}

async fn wait_for_stable(peer_connection: &Arc<dyn PeerConnection>) -> Result<(), PartyTracksError> {
    if peer_connection.signaling_state() == SignalingState::Stable {
        return Ok(());
    }
    let mut states = peer_connection.subscribe_signaling_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while states.changed().await.is_ok() {
            if *states.borrow() == SignalingState::Stable {
                return;
            }
        }
    })
    .await
    .map_err(|_| PartyTracksError::Timeout)
}

async fn wait_for_transceiver_with_mid(
    mid: &str,
    events: &mut broadcast::Receiver<TrackEvent>,
) -> Option<Arc<dyn Transceiver>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if event.transceiver.mid().as_deref() == Some(mid) => return Some(event.transceiver),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}
