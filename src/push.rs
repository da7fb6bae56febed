//! Publishes local media tracks to the SFU.
//!
//! A push binds `(stableId, track, sendEncodings)` to a `(session,
//! transceiver)` pair. The `stableId` is minted once and is the only thing
//! that survives a session rebuild: the transceiver is stopped and a fresh
//! one negotiated under the same id as soon as the shared session changes
//! underneath an active push.

use std::sync::Arc;
use std::time::Duration;

use partytracks_protocol::{Location, NewTracksRequest, SdpType as WireSdpType, SessionDescriptionObject, TrackObject};
use partytracks_webrtc::{
    MediaStreamTrack, RtpEncodingParameters, SdpType, SessionDescription, Transceiver,
    TransceiverDirection,
};

use crate::error::PartyTracksError;
use crate::scheduler::FifoScheduler;
use crate::session::{SessionCoordinator, SessionHandle};
use crate::sfu_client::SfuClient;
use crate::track_metadata::{PushedTrack, TrackMetadata};

pub struct PushTrackEngine {
    coordinator: SessionCoordinator,
    sfu: Arc<SfuClient>,
    scheduler: Arc<FifoScheduler>,
}

impl PushTrackEngine {
    #[must_use]
    pub fn new(coordinator: SessionCoordinator, sfu: Arc<SfuClient>, scheduler: Arc<FifoScheduler>) -> Self {
        Self { coordinator, sfu, scheduler }
    }

    /// Push a local track. The returned [`PushedTrack`] carries a freshly
    /// minted `stableId` that is the `trackName` a remote peer must use to
    /// pull this track back, and stays current across session rebuilds.
    pub async fn push_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<PushedTrack, PartyTracksError> {
        let stable_id = uuid::Uuid::new_v4().to_string();
        let encodings = Vec::new();
        let (transceiver, handle) =
            negotiate_push(&self.coordinator, &self.sfu, &self.scheduler, &stable_id, track.clone(), &encodings)
                .await?;

        let pushed = PushedTrack::new(
            TrackMetadata { track_name: stable_id.clone(), session_id: Some(handle.session.session_id.clone()), location: Location::Local },
            stable_id.clone(),
            track,
            encodings,
            transceiver,
            handle,
        );

        spawn_rebuild_watcher(self.coordinator.clone(), self.sfu.clone(), self.scheduler.clone(), pushed.clone());

        Ok(pushed)
    }
}

/// Negotiate one sendonly transceiver for `stable_id` onto the current
/// session: add the transceiver, offer/answer with the SFU, and wait for
/// outbound RTP before handing the caller a usable handle.
async fn negotiate_push(
    coordinator: &SessionCoordinator,
    sfu: &Arc<SfuClient>,
    scheduler: &Arc<FifoScheduler>,
    stable_id: &str,
    track: Arc<dyn MediaStreamTrack>,
    encodings: &[RtpEncodingParameters],
) -> Result<(Arc<dyn Transceiver>, SessionHandle), PartyTracksError> {
    let handle = coordinator.acquire().await?;
    let peer_connection = handle.session.peer_connection.clone();
    let session_id = handle.session.session_id.clone();

    let transceiver = peer_connection.add_transceiver(track, TransceiverDirection::Sendonly).await?;
    if !encodings.is_empty() {
        transceiver.sender().set_parameters(encodings.to_vec()).await?;
    }

    let sfu = sfu.clone();
    let job_peer_connection = peer_connection.clone();
    let job_transceiver = transceiver.clone();
    let job_stable_id = stable_id.to_owned();
    let response = scheduler
        .schedule(move || async move {
            let offer = job_peer_connection.create_offer().await?;
            job_peer_connection.set_local_description(SessionDescription { sdp_type: SdpType::Offer, sdp: offer }).await?;
            let local = job_peer_connection.current_local_description().ok_or(PartyTracksError::SessionClosed)?;

            let response = sfu
                .new_tracks(
                    &session_id,
                    NewTracksRequest {
                        session_description: Some(SessionDescriptionObject { sdp_type: WireSdpType::Offer, sdp: local.sdp }),
                        tracks: vec![TrackObject {
                            location: Some(Location::Local),
                            track_name: Some(job_stable_id),
                            mid: job_transceiver.mid(),
                            ..Default::default()
                        }],
                    },
                )
                .await?;

            if response.is_error() {
                return Err(PartyTracksError::sfu(
                    response.error_code.unwrap_or_default(),
                    response.error_description.unwrap_or_default(),
                ));
            }

            if let Some(answer) = &response.session_description {
                job_peer_connection
                    .set_remote_description(SessionDescription { sdp_type: SdpType::Answer, sdp: answer.sdp.clone() })
                    .await?;
            }

            Ok::<_, PartyTracksError>(response)
        })
        .await?;

    if let Some(track_entry) = response.tracks.first() {
        if track_entry.is_error() {
            return Err(PartyTracksError::sfu(
                track_entry.error_code.clone().unwrap_or_default(),
                track_entry.error_description.clone().unwrap_or_default(),
            ));
        }
    }

    // Don't hand a transceiver back until media is actually flowing: a
    // subscriber that pulls this track the instant it is emitted should
    // find real RTP, not an empty sender.
    wait_for_outbound_rtp(&transceiver).await?;

    Ok((transceiver, handle))
}

/// Watches the shared session for a rebuild and re-pushes the same
/// `stableId` onto whatever session replaces it, per spec 4.5's "unsubscribe
/// the inner subscription ... then re-push with the preserved stableId".
fn spawn_rebuild_watcher(coordinator: SessionCoordinator, sfu: Arc<SfuClient>, scheduler: Arc<FifoScheduler>, pushed: PushedTrack) {
    tokio::spawn(async move {
        let mut session_watch = coordinator.watch();
        let mut known_session_id = pushed.metadata.session_id.clone();

        loop {
            if session_watch.changed().await.is_err() {
                return;
            }
            let Some(session) = session_watch.borrow().clone() else { continue };
            if Some(session.session_id.clone()) == known_session_id {
                continue;
            }
            known_session_id = Some(session.session_id.clone());

            let stale_transceiver = pushed.transceiver();
            let _ = stale_transceiver.stop().await;

            let track = pushed.current_track();
            let encodings = pushed.current_encodings();
            match negotiate_push(&coordinator, &sfu, &scheduler, &pushed.stable_id, track, &encodings).await {
                Ok((transceiver, handle)) => pushed.adopt_rebuilt_session(transceiver, handle),
                Err(_) => {
                    // The next session change (if any) gets another chance;
                    // nothing useful to surface here since nobody is polling
                    // this background task for errors.
                }
            }
        }
    });
}

async fn wait_for_outbound_rtp(transceiver: &Arc<dyn Transceiver>) -> Result<(), PartyTracksError> {
    let sender = transceiver.sender();
    let mut delay = Duration::from_millis(1);
    let cap = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);

    loop {
        if let Some(stats) = sender.get_outbound_stats().await? {
            if stats.bytes_sent > 0 {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PartyTracksError::Timeout);
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(cap);
    }
}
