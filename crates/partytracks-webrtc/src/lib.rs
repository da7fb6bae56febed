//! Collaborator-facing WebRTC abstractions.
//!
//! `partytracks` never talks to a concrete WebRTC stack directly: the caller
//! hands it a [`PeerConnectionFactory`] and the coordinator drives whatever
//! implementation sits behind it (a real browser/media engine binding, or the
//! in-process mock in `partytracks-test-utils`). This mirrors the original
//! ecosystem treating `RTCPeerConnection`/`MediaStreamTrack` as caller-supplied
//! collaborators rather than library internals.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum WebrtcError {
    #[error("failed to create offer: {0}")]
    CreateOffer(String),
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),
    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),
    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),
    #[error("failed to add transceiver: {0}")]
    AddTransceiver(String),
    #[error("failed to replace track: {0}")]
    ReplaceTrack(String),
    #[error("failed to set sender parameters: {0}")]
    SetParameters(String),
    #[error("failed to read stats: {0}")]
    GetStats(String),
    #[error("failed to stop transceiver: {0}")]
    StopTransceiver(String),
    #[error("peer connection already closed")]
    AlreadyClosed,
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransceiverDirection {
    Sendonly,
    Recvonly,
    Sendrecv,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub bundle_policy: BundlePolicy,
}

/// One simulcast/SVC encoding layer for [`Sender::set_parameters`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtpEncodingParameters {
    pub rid: Option<String>,
    pub active: bool,
    pub max_bitrate: Option<u64>,
    pub scale_resolution_down_by: Option<f64>,
}

/// Outbound RTP counters as read from `getStats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboundRtpStats {
    pub bytes_sent: u64,
}

// ---------------------------------------------------------------------------
// MediaStreamTrack
// ---------------------------------------------------------------------------

pub trait MediaStreamTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
}

// ---------------------------------------------------------------------------
// Sender / Receiver / Transceiver
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Sender: Send + Sync {
    async fn replace_track(
        &self,
        track: Option<Arc<dyn MediaStreamTrack>>,
    ) -> Result<(), WebrtcError>;

    async fn set_parameters(
        &self,
        encodings: Vec<RtpEncodingParameters>,
    ) -> Result<(), WebrtcError>;

    /// `None` means no `outbound-rtp` stat exists yet (nothing sent so far).
    async fn get_outbound_stats(&self) -> Result<Option<OutboundRtpStats>, WebrtcError>;
}

pub trait Receiver: Send + Sync {
    fn track(&self) -> Arc<dyn MediaStreamTrack>;
}

#[async_trait]
pub trait Transceiver: Send + Sync {
    /// `None` until the offer/answer exchange that created this transceiver
    /// has completed.
    fn mid(&self) -> Option<String>;
    fn sender(&self) -> Arc<dyn Sender>;
    fn receiver(&self) -> Arc<dyn Receiver>;
    async fn stop(&self) -> Result<(), WebrtcError>;
}

/// Fired whenever the underlying implementation surfaces a newly negotiated
/// remote transceiver (the `track` event in browser terms).
#[derive(Clone)]
pub struct TrackEvent {
    pub transceiver: Arc<dyn Transceiver>,
}

// ---------------------------------------------------------------------------
// PeerConnection
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_transceiver(
        &self,
        track: Arc<dyn MediaStreamTrack>,
        direction: TransceiverDirection,
    ) -> Result<Arc<dyn Transceiver>, WebrtcError>;

    async fn create_offer(&self) -> Result<String, WebrtcError>;
    async fn create_answer(&self) -> Result<String, WebrtcError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebrtcError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebrtcError>;

    /// The description most recently applied via `set_local_description`,
    /// including ones still pending full negotiation. See the Open Questions
    /// section of DESIGN.md for why the pull path reads this rather than a
    /// settled-only accessor.
    fn current_local_description(&self) -> Option<SessionDescription>;

    fn connection_state(&self) -> ConnectionState;
    fn ice_connection_state(&self) -> IceConnectionState;
    fn signaling_state(&self) -> SignalingState;

    fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState>;
    fn subscribe_ice_connection_state(&self) -> watch::Receiver<IceConnectionState>;
    fn subscribe_signaling_state(&self) -> watch::Receiver<SignalingState>;

    /// Broadcast of newly surfaced remote transceivers. Subscribers that lag
    /// behind the ring buffer must re-subscribe; `PullTrackEngine` treats a
    /// `Lagged` error as "keep waiting", not as a fatal protocol error.
    fn subscribe_track_events(&self) -> broadcast::Receiver<TrackEvent>;

    async fn close(&self) -> Result<(), WebrtcError>;

    /// Escape hatch for test doubles that need to drive themselves from
    /// outside the trait surface (firing a remote track, flipping a watch
    /// channel) once already erased behind `Arc<dyn PeerConnection>`.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, config: RtcConfiguration) -> Result<Arc<dyn PeerConnection>, WebrtcError>;
}
