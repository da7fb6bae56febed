// partytracks-protocol: SFU HTTP wire types and serialization.
//
// All request/response bodies mirror the SFU's JSON schema verbatim (field
// names follow the wire's camelCase via `serde(rename)`), so callers can
// round-trip through `serde_json` without a translation layer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Where a track originates from, relative to the peer connection holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Local,
    Remote,
}

/// SDP type tag, as used in `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as exchanged with the SFU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptionObject {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Simulcast layer preference, carried on pull/update requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulcastPreference {
    #[serde(rename = "preferredRid")]
    pub preferred_rid: String,
}

/// One track descriptor, in either direction.
///
/// Used both as the caller's *request* for a track (location + trackName +
/// sessionId identify a remote track to pull) and as the SFU's *response*
/// entry (mid + errorCode populated after negotiation). The `mid` field MUST
/// be stripped before this type's data crosses the public `partytracks` API
/// boundary -- see [`TrackObject::without_mid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(rename = "trackName", default, skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast: Option<SimulcastPreference>,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "errorDescription", default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TrackObject {
    /// Strip `mid`: it is only valid within the peer connection that
    /// negotiated it and must never leak into caller-visible metadata.
    #[must_use]
    pub fn without_mid(mut self) -> Self {
        self.mid = None;
        self
    }

    /// `true` if the SFU flagged this entry as failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// One ICE server entry, as returned by `/generate-ice-servers` or supplied
/// by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /sessions/new
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// GET /generate-ice-servers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateIceServersResponse {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

// ---------------------------------------------------------------------------
// POST /sessions/{id}/tracks/new (push: offer + tracks; pull: tracks only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTracksRequest {
    #[serde(rename = "sessionDescription", default, skip_serializing_if = "Option::is_none")]
    pub session_description: Option<SessionDescriptionObject>,
    pub tracks: Vec<TrackObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewTracksResponse {
    #[serde(rename = "sessionDescription", default, skip_serializing_if = "Option::is_none")]
    pub session_description: Option<SessionDescriptionObject>,
    #[serde(default)]
    pub tracks: Vec<TrackObject>,
    #[serde(rename = "requiresImmediateRenegotiation", default)]
    pub requires_immediate_renegotiation: bool,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "errorDescription", default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl NewTracksResponse {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

// ---------------------------------------------------------------------------
// PUT /sessions/{id}/renegotiate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenegotiateRequest {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescriptionObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RenegotiateResponse {
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "errorDescription", default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// PUT /sessions/{id}/tracks/update (simulcast RID change)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTracksRequest {
    pub tracks: Vec<TrackObject>,
}

// ---------------------------------------------------------------------------
// PUT /sessions/{id}/tracks/close
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTrackRef {
    pub mid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTracksRequest {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescriptionObject,
    pub tracks: Vec<CloseTrackRef>,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTracksResponse {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescriptionObject,
}

// ---------------------------------------------------------------------------
// History ring entries
// ---------------------------------------------------------------------------

/// One entry in the diagnostic history ring.
///
/// Tagged rather than an untyped `serde_json::Value` wrapper so consumers can
/// match exhaustively; the inner `body` remains a parsed JSON document since
/// the wire shapes above are a moving target across SFU versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Request {
        endpoint: String,
        method: String,
        body: serde_json::Value,
    },
    Response {
        endpoint: String,
        method: String,
        status: u16,
        body: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_object_strips_mid_but_keeps_other_fields() {
        let track = TrackObject {
            track_name: Some("abc".to_owned()),
            mid: Some("0".to_owned()),
            location: Some(Location::Local),
            ..Default::default()
        }
        .without_mid();

        assert_eq!(track.mid, None);
        assert_eq!(track.track_name.as_deref(), Some("abc"));
        assert_eq!(track.location, Some(Location::Local));
    }

    #[test]
    fn track_object_is_error_requires_non_empty_code() {
        let mut track = TrackObject::default();
        assert!(!track.is_error());
        track.error_code = Some(String::new());
        assert!(!track.is_error());
        track.error_code = Some("ERR_TRACK_NOT_FOUND".to_owned());
        assert!(track.is_error());
    }

    #[test]
    fn new_tracks_request_serializes_push_shape() {
        let req = NewTracksRequest {
            session_description: Some(SessionDescriptionObject {
                sdp_type: SdpType::Offer,
                sdp: "v=0".to_owned(),
            }),
            tracks: vec![TrackObject {
                track_name: Some("t1".to_owned()),
                mid: Some("0".to_owned()),
                location: Some(Location::Local),
                ..Default::default()
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sessionDescription"]["type"], "offer");
        assert_eq!(json["tracks"][0]["trackName"], "t1");
        assert_eq!(json["tracks"][0]["location"], "local");
    }

    #[test]
    fn new_tracks_request_omits_session_description_for_pull() {
        let req = NewTracksRequest {
            session_description: None,
            tracks: vec![TrackObject {
                track_name: Some("remote-1".to_owned()),
                session_id: Some("S1".to_owned()),
                ..Default::default()
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("sessionDescription").is_none());
    }

    #[test]
    fn new_tracks_response_is_error_from_top_level_code() {
        let mut resp = NewTracksResponse::default();
        assert!(!resp.is_error());
        resp.error_code = Some("ERR_SESSION_NOT_FOUND".to_owned());
        assert!(resp.is_error());
    }

    #[test]
    fn history_entry_round_trips_through_json() {
        let entry = HistoryEntry::Request {
            endpoint: "/sessions/new".to_owned(),
            method: "POST".to_owned(),
            body: serde_json::json!({}),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        match back {
            HistoryEntry::Request { endpoint, method, .. } => {
                assert_eq!(endpoint, "/sessions/new");
                assert_eq!(method, "POST");
            }
            HistoryEntry::Response { .. } => panic!("expected Request variant"),
        }
    }
}
