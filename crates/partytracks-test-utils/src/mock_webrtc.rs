//! In-process fakes for the `partytracks-webrtc` traits.
//!
//! These stand in for a real media engine binding in tests: they hold no
//! actual media, but faithfully track mid assignment, sender parameters, and
//! the state watch channels the coordinator subscribes to. Grounded on
//! `rt-test-utils::mock_ws_server` for the "accept loop plus test-driven
//! handle" shape, adapted here to an in-process trait double instead of a
//! socket listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use partytracks_webrtc::{
    ConnectionState, IceConnectionState, MediaStreamTrack, PeerConnection, PeerConnectionFactory,
    Receiver, RtcConfiguration, RtpEncodingParameters, Sender, SessionDescription,
    SignalingState, TrackEvent, TrackKind, Transceiver, TransceiverDirection, WebrtcError,
};
use tokio::sync::{broadcast, watch};

#[derive(Debug)]
pub struct MockMediaStreamTrack {
    id: String,
    kind: TrackKind,
}

impl MockMediaStreamTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self { id: id.into(), kind })
    }
}

impl MediaStreamTrack for MockMediaStreamTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }
}

pub struct MockSender {
    track: Mutex<Option<Arc<dyn MediaStreamTrack>>>,
    parameters: Mutex<Vec<RtpEncodingParameters>>,
    outbound_bytes_sent: Mutex<Option<u64>>,
}

impl MockSender {
    fn new(track: Option<Arc<dyn MediaStreamTrack>>) -> Arc<Self> {
        // A sender constructed with a track already attached is assumed to
        // start flowing RTP immediately, so tests exercising the "wait for
        // outbound RTP" guarantee don't need a separate test hook for the
        // common case.
        let initial_bytes_sent = if track.is_some() { Some(1200) } else { None };
        Arc::new(Self {
            track: Mutex::new(track),
            parameters: Mutex::new(Vec::new()),
            outbound_bytes_sent: Mutex::new(initial_bytes_sent),
        })
    }

    /// Test hook: make `get_outbound_stats` start returning a value, as if
    /// RTP had begun flowing.
    pub fn set_bytes_sent(&self, bytes: u64) {
        *self.outbound_bytes_sent.lock().unwrap() = Some(bytes);
    }

    pub fn current_track(&self) -> Option<Arc<dyn MediaStreamTrack>> {
        self.track.lock().unwrap().clone()
    }

    pub fn parameters(&self) -> Vec<RtpEncodingParameters> {
        self.parameters.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn replace_track(&self, track: Option<Arc<dyn MediaStreamTrack>>) -> Result<(), WebrtcError> {
        *self.track.lock().unwrap() = track;
        Ok(())
    }

    async fn set_parameters(&self, encodings: Vec<RtpEncodingParameters>) -> Result<(), WebrtcError> {
        *self.parameters.lock().unwrap() = encodings;
        Ok(())
    }

    async fn get_outbound_stats(&self) -> Result<Option<partytracks_webrtc::OutboundRtpStats>, WebrtcError> {
        Ok(self
            .outbound_bytes_sent
            .lock()
            .unwrap()
            .map(|bytes_sent| partytracks_webrtc::OutboundRtpStats { bytes_sent }))
    }
}

pub struct MockReceiver {
    track: Arc<dyn MediaStreamTrack>,
}

impl Receiver for MockReceiver {
    fn track(&self) -> Arc<dyn MediaStreamTrack> {
        self.track.clone()
    }
}

pub struct MockTransceiver {
    mid: Mutex<Option<String>>,
    sender: Arc<MockSender>,
    receiver: Arc<MockReceiver>,
    stopped: AtomicBool,
}

impl MockTransceiver {
    fn new(track: Arc<dyn MediaStreamTrack>, direction: TransceiverDirection) -> Arc<Self> {
        let sender_track = match direction {
            TransceiverDirection::Sendonly | TransceiverDirection::Sendrecv => Some(track.clone()),
            _ => None,
        };
        Arc::new(Self {
            mid: Mutex::new(None),
            sender: MockSender::new(sender_track),
            receiver: Arc::new(MockReceiver { track }),
            stopped: AtomicBool::new(false),
        })
    }

    /// Test hook: simulate the SFU assigning a mid after negotiation.
    pub fn assign_mid(&self, mid: impl Into<String>) {
        *self.mid.lock().unwrap() = Some(mid.into());
    }

    pub fn mock_sender(&self) -> Arc<MockSender> {
        self.sender.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transceiver for MockTransceiver {
    fn mid(&self) -> Option<String> {
        self.mid.lock().unwrap().clone()
    }

    fn sender(&self) -> Arc<dyn Sender> {
        self.sender.clone()
    }

    fn receiver(&self) -> Arc<dyn Receiver> {
        self.receiver.clone()
    }

    async fn stop(&self) -> Result<(), WebrtcError> {
        self.stopped.store(true, Ordering::Relaxed);
        Ok(())
    }
}

pub struct MockPeerConnection {
    transceivers: Mutex<Vec<Arc<MockTransceiver>>>,
    local_description: Mutex<Option<SessionDescription>>,
    connection_state: watch::Sender<ConnectionState>,
    ice_connection_state: watch::Sender<IceConnectionState>,
    signaling_state: watch::Sender<SignalingState>,
    track_events: broadcast::Sender<TrackEvent>,
    closed: AtomicBool,
    offer_counter: Mutex<u32>,
}

impl MockPeerConnection {
    pub fn new() -> Arc<Self> {
        let (connection_state, _) = watch::channel(ConnectionState::New);
        let (ice_connection_state, _) = watch::channel(IceConnectionState::New);
        let (signaling_state, _) = watch::channel(SignalingState::Stable);
        let (track_events, _) = broadcast::channel(64);
        Arc::new(Self {
            transceivers: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            connection_state,
            ice_connection_state,
            signaling_state,
            track_events,
            closed: AtomicBool::new(false),
            offer_counter: Mutex::new(0),
        })
    }

    /// Test hook: drive the connection-state watch channel.
    pub fn set_connection_state(&self, state: ConnectionState) {
        let _ = self.connection_state.send(state);
    }

    pub fn set_ice_connection_state(&self, state: IceConnectionState) {
        let _ = self.ice_connection_state.send(state);
    }

    /// Test hook: simulate the remote side negotiating a new track onto an
    /// existing (or freshly constructed) transceiver.
    pub fn fire_remote_track(&self, track: Arc<dyn MediaStreamTrack>, mid: impl Into<String>) -> Arc<MockTransceiver> {
        let transceiver = MockTransceiver::new(track, TransceiverDirection::Recvonly);
        transceiver.assign_mid(mid);
        self.transceivers.lock().unwrap().push(transceiver.clone());
        let _ = self.track_events.send(TrackEvent { transceiver: transceiver.clone() });
        transceiver
    }

    pub fn transceivers(&self) -> Vec<Arc<MockTransceiver>> {
        self.transceivers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_transceiver(
        &self,
        track: Arc<dyn MediaStreamTrack>,
        direction: TransceiverDirection,
    ) -> Result<Arc<dyn Transceiver>, WebrtcError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(WebrtcError::AlreadyClosed);
        }
        let transceiver = MockTransceiver::new(track, direction);
        self.transceivers.lock().unwrap().push(transceiver.clone());
        Ok(transceiver)
    }

    async fn create_offer(&self) -> Result<String, WebrtcError> {
        let mut counter = self.offer_counter.lock().unwrap();
        *counter += 1;
        Ok(format!("v=0\r\no=mock-offer {counter}\r\n"))
    }

    async fn create_answer(&self) -> Result<String, WebrtcError> {
        Ok("v=0\r\no=mock-answer\r\n".to_owned())
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebrtcError> {
        *self.local_description.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), WebrtcError> {
        Ok(())
    }

    fn current_local_description(&self) -> Option<SessionDescription> {
        self.local_description.lock().unwrap().clone()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        *self.ice_connection_state.borrow()
    }

    fn signaling_state(&self) -> SignalingState {
        *self.signaling_state.borrow()
    }

    fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    fn subscribe_ice_connection_state(&self) -> watch::Receiver<IceConnectionState> {
        self.ice_connection_state.subscribe()
    }

    fn subscribe_signaling_state(&self) -> watch::Receiver<SignalingState> {
        self.signaling_state.subscribe()
    }

    fn subscribe_track_events(&self) -> broadcast::Receiver<TrackEvent> {
        self.track_events.subscribe()
    }

    async fn close(&self) -> Result<(), WebrtcError> {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.connection_state.send(ConnectionState::Closed);
        let _ = self.signaling_state.send(SignalingState::Closed);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct MockPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for MockPeerConnectionFactory {
    async fn create(&self, _config: RtcConfiguration) -> Result<Arc<dyn PeerConnection>, WebrtcError> {
        Ok(MockPeerConnection::new())
    }
}
