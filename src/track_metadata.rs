//! The handles returned to callers of `push_track`/`pull_track`: a snapshot
//! of identity (`TrackMetadata`) plus live state that survives a session
//! rebuild underneath the caller.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use partytracks_protocol::{Location, SimulcastPreference};
use partytracks_webrtc::{MediaStreamTrack, RtpEncodingParameters, Transceiver};

use crate::error::PartyTracksError;
use crate::session::SessionHandle;

/// The caller-visible identity of a track, stripped of the `mid` value that
/// is only meaningful within the negotiating peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub track_name: String,
    pub session_id: Option<String>,
    pub location: Location,
}

struct PushState {
    track: StdMutex<Arc<dyn MediaStreamTrack>>,
    encodings: StdMutex<Vec<RtpEncodingParameters>>,
    transceiver: StdMutex<Arc<dyn Transceiver>>,
    // Kept alive only to pin the session open; never read back.
    session_handle: StdMutex<SessionHandle>,
}

/// A track this client is sending.
///
/// `stable_id` is minted once, on the first push, and is the wire
/// `trackName` sent to the SFU -- it is the handle remote peers use to pull
/// this track back, and it persists across session rebuilds even though the
/// underlying transceiver is recreated each time.
#[derive(Clone)]
pub struct PushedTrack {
    pub metadata: TrackMetadata,
    pub stable_id: String,
    state: Arc<PushState>,
}

impl std::fmt::Debug for PushedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushedTrack")
            .field("metadata", &self.metadata)
            .field("stable_id", &self.stable_id)
            .finish_non_exhaustive()
    }
}

impl PushedTrack {
    pub(crate) fn new(
        metadata: TrackMetadata,
        stable_id: String,
        track: Arc<dyn MediaStreamTrack>,
        encodings: Vec<RtpEncodingParameters>,
        transceiver: Arc<dyn Transceiver>,
        session_handle: SessionHandle,
    ) -> Self {
        Self {
            metadata,
            stable_id,
            state: Arc::new(PushState {
                track: StdMutex::new(track),
                encodings: StdMutex::new(encodings),
                transceiver: StdMutex::new(transceiver),
                session_handle: StdMutex::new(session_handle),
            }),
        }
    }

    #[must_use]
    pub fn transceiver(&self) -> Arc<dyn Transceiver> {
        self.state.transceiver.lock().unwrap().clone()
    }

    /// Swap the outgoing media source without renegotiating, mirroring
    /// `RTCRtpSender.replaceTrack`.
    pub async fn replace_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<(), PartyTracksError> {
        let transceiver = self.state.transceiver.lock().unwrap().clone();
        transceiver.sender().replace_track(Some(track.clone())).await?;
        *self.state.track.lock().unwrap() = track;
        Ok(())
    }

    /// Merge new simulcast/SVC encodings into the sender's current
    /// parameters -- an encoding with a `rid` matching an existing one
    /// replaces it, anything new is appended -- then applies the merged set
    /// via `RTCRtpSender.setParameters`.
    pub async fn set_send_encodings(&self, encodings: Vec<RtpEncodingParameters>) -> Result<(), PartyTracksError> {
        let merged = {
            let mut current = self.state.encodings.lock().unwrap();
            for encoding in encodings {
                match current.iter_mut().find(|e| e.rid == encoding.rid) {
                    Some(existing) => *existing = encoding,
                    None => current.push(encoding),
                }
            }
            current.clone()
        };
        let transceiver = self.state.transceiver.lock().unwrap().clone();
        transceiver.sender().set_parameters(merged).await?;
        Ok(())
    }

    pub(crate) fn current_track(&self) -> Arc<dyn MediaStreamTrack> {
        self.state.track.lock().unwrap().clone()
    }

    pub(crate) fn current_encodings(&self) -> Vec<RtpEncodingParameters> {
        self.state.encodings.lock().unwrap().clone()
    }

    pub(crate) fn adopt_rebuilt_session(&self, transceiver: Arc<dyn Transceiver>, session_handle: SessionHandle) {
        *self.state.transceiver.lock().unwrap() = transceiver;
        *self.state.session_handle.lock().unwrap() = session_handle;
    }
}

struct PullState {
    transceiver: StdMutex<Arc<dyn Transceiver>>,
    track: StdMutex<Arc<dyn MediaStreamTrack>>,
    simulcast: StdMutex<Option<SimulcastPreference>>,
    session_handle: StdMutex<SessionHandle>,
}

/// A track this client is receiving.
#[derive(Clone)]
pub struct PulledTrack {
    pub metadata: TrackMetadata,
    state: Arc<PullState>,
}

impl PulledTrack {
    pub(crate) fn new(
        metadata: TrackMetadata,
        transceiver: Arc<dyn Transceiver>,
        track: Arc<dyn MediaStreamTrack>,
        simulcast: Option<SimulcastPreference>,
        session_handle: SessionHandle,
    ) -> Self {
        Self {
            metadata,
            state: Arc::new(PullState {
                transceiver: StdMutex::new(transceiver),
                track: StdMutex::new(track),
                simulcast: StdMutex::new(simulcast),
                session_handle: StdMutex::new(session_handle),
            }),
        }
    }

    #[must_use]
    pub fn transceiver(&self) -> Arc<dyn Transceiver> {
        self.state.transceiver.lock().unwrap().clone()
    }

    #[must_use]
    pub fn track(&self) -> Arc<dyn MediaStreamTrack> {
        self.state.track.lock().unwrap().clone()
    }

    pub(crate) fn current_simulcast(&self) -> Option<SimulcastPreference> {
        self.state.simulcast.lock().unwrap().clone()
    }

    pub(crate) fn set_current_simulcast(&self, preference: Option<SimulcastPreference>) {
        *self.state.simulcast.lock().unwrap() = preference;
    }

    pub(crate) fn adopt_rebuilt_session(
        &self,
        transceiver: Arc<dyn Transceiver>,
        track: Arc<dyn MediaStreamTrack>,
        session_handle: SessionHandle,
    ) {
        *self.state.transceiver.lock().unwrap() = transceiver;
        *self.state.track.lock().unwrap() = track;
        *self.state.session_handle.lock().unwrap() = session_handle;
    }
}
