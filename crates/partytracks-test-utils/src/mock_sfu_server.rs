//! A scriptable mock of the SFU's HTTP control plane.
//!
//! Binds to a random local port, like `rt_test_utils::MockWsServer` binds its
//! mock WebSocket listener, and exposes a small "queue a canned response"
//! API so tests can drive specific negotiation outcomes (errors,
//! `requiresImmediateRenegotiation`, per-track failures) without a real SFU.
//! Absent a queued response, each endpoint falls back to a reasonable
//! default so happy-path tests don't need to script every call.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use partytracks_protocol::{
    CloseTracksRequest, CloseTracksResponse, GenerateIceServersResponse, IceServer,
    NewSessionResponse, NewTracksRequest, NewTracksResponse, RenegotiateRequest,
    RenegotiateResponse, SdpType, SessionDescriptionObject, UpdateTracksRequest,
};
use tokio::net::TcpListener;

#[derive(Default)]
struct Scripted {
    new_tracks: VecDeque<NewTracksResponse>,
    renegotiate: VecDeque<RenegotiateResponse>,
    close_tracks: VecDeque<CloseTracksResponse>,
}

#[derive(Clone)]
struct AppState {
    scripted: Arc<Mutex<Scripted>>,
}

pub struct MockSfuServer {
    addr: SocketAddr,
    scripted: Arc<Mutex<Scripted>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockSfuServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock sfu listener");
        let addr = listener.local_addr().expect("read bound addr");
        let scripted = Arc::new(Mutex::new(Scripted::default()));
        let state = AppState { scripted: scripted.clone() };

        let app = Router::new()
            .route("/sessions/new", post(new_session))
            .route("/generate-ice-servers", get(generate_ice_servers))
            .route("/sessions/{id}/tracks/new", post(new_tracks))
            .route("/sessions/{id}/renegotiate", put(renegotiate))
            .route("/sessions/{id}/tracks/update", put(update_tracks))
            .route("/sessions/{id}/tracks/close", put(close_tracks))
            .with_state(state);

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock sfu server crashed");
        });

        Self { addr, scripted, _task: task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn queue_new_tracks_response(&self, response: NewTracksResponse) {
        self.scripted.lock().unwrap().new_tracks.push_back(response);
    }

    pub fn queue_renegotiate_response(&self, response: RenegotiateResponse) {
        self.scripted.lock().unwrap().renegotiate.push_back(response);
    }

    pub fn queue_close_tracks_response(&self, response: CloseTracksResponse) {
        self.scripted.lock().unwrap().close_tracks.push_back(response);
    }
}

async fn new_session() -> Json<NewSessionResponse> {
    Json(NewSessionResponse { session_id: uuid::Uuid::new_v4().to_string() })
}

async fn generate_ice_servers() -> Json<GenerateIceServersResponse> {
    Json(GenerateIceServersResponse {
        ice_servers: vec![IceServer {
            urls: vec!["stun:stun.example.com:3478".to_owned()],
            username: None,
            credential: None,
        }],
    })
}

async fn new_tracks(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
    Json(request): Json<NewTracksRequest>,
) -> Json<NewTracksResponse> {
    if let Some(scripted) = state.scripted.lock().unwrap().new_tracks.pop_front() {
        return Json(scripted);
    }

    let tracks = request
        .tracks
        .into_iter()
        .enumerate()
        .map(|(i, mut track)| {
            track.mid = Some(i.to_string());
            track
        })
        .collect();

    Json(NewTracksResponse {
        session_description: request.session_description.map(|sdp| SessionDescriptionObject {
            sdp_type: SdpType::Answer,
            sdp: sdp.sdp,
        }),
        tracks,
        requires_immediate_renegotiation: false,
        error_code: None,
        error_description: None,
    })
}

async fn renegotiate(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
    Json(_request): Json<RenegotiateRequest>,
) -> Json<RenegotiateResponse> {
    if let Some(scripted) = state.scripted.lock().unwrap().renegotiate.pop_front() {
        return Json(scripted);
    }
    Json(RenegotiateResponse { error_code: None, error_description: None })
}

async fn update_tracks(Path(_session_id): Path<String>, Json(_request): Json<UpdateTracksRequest>) -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

async fn close_tracks(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
    Json(request): Json<CloseTracksRequest>,
) -> Json<CloseTracksResponse> {
    if let Some(scripted) = state.scripted.lock().unwrap().close_tracks.pop_front() {
        return Json(scripted);
    }
    Json(CloseTracksResponse { session_description: request.session_description })
}
