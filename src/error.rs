use thiserror::Error;

/// Every fallible outcome a caller of this crate can observe.
#[derive(Debug, Clone, Error)]
pub enum PartyTracksError {
    #[error("http request to {endpoint} failed: {message}")]
    Http { endpoint: String, message: String },

    #[error("sfu rejected the request: {code}: {description}")]
    Sfu { code: String, description: String },

    #[error(transparent)]
    Webrtc(#[from] partytracks_webrtc::WebrtcError),

    #[error("session is closed")]
    SessionClosed,

    #[error("track not found: {0}")]
    TrackNotFound(String),

    #[error("operation timed out waiting for the sfu or peer connection")]
    Timeout,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PartyTracksError {
    pub fn sfu(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Sfu { code: code.into(), description: description.into() }
    }

    pub fn http(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http { endpoint: endpoint.into(), message: message.into() }
    }
}
