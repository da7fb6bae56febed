mod mock_sfu_server;
mod mock_webrtc;

pub use mock_sfu_server::MockSfuServer;
pub use mock_webrtc::{
    MockMediaStreamTrack, MockPeerConnection, MockPeerConnectionFactory, MockReceiver, MockSender,
    MockTransceiver,
};
