//! End-to-end coverage over a mock SFU and mock WebRTC stack: push a local
//! track, pull a remote one, then close both.

use std::sync::Arc;

use partytracks::{HttpFetcher, PartyTracksError, PartyTracksClient, ReqwestFetcher};
use partytracks::webrtc::TrackKind;
use partytracks_test_utils::{MockMediaStreamTrack, MockPeerConnection, MockPeerConnectionFactory, MockSfuServer};

struct Fixture {
    _server: MockSfuServer,
    client: PartyTracksClient,
}

async fn build_fixture() -> Fixture {
    let server = MockSfuServer::start().await;
    let fetcher: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new());
    let config = partytracks::Config::from_toml_str(&format!(r#"sfu_base_url = "{}""#, server.base_url())).unwrap();
    let factory = Arc::new(MockPeerConnectionFactory);
    let client = PartyTracksClient::new(&config, fetcher, factory);
    Fixture { _server: server, client }
}

#[tokio::test]
async fn pushing_a_local_track_assigns_metadata_and_transceiver() {
    let fixture = build_fixture().await;
    let track = MockMediaStreamTrack::new("local-track-1", TrackKind::Video);

    let pushed = fixture.client.push_track(track).await.unwrap();

    assert_eq!(pushed.metadata.track_name, pushed.stable_id);
    assert!(!pushed.stable_id.is_empty());
    assert!(pushed.metadata.session_id.is_some());
}

#[tokio::test]
async fn pushing_two_tracks_reuses_the_same_session() {
    let fixture = build_fixture().await;
    let track_a = MockMediaStreamTrack::new("a", TrackKind::Audio);
    let track_b = MockMediaStreamTrack::new("b", TrackKind::Video);

    let pushed_a = fixture.client.push_track(track_a).await.unwrap();
    let pushed_b = fixture.client.push_track(track_b).await.unwrap();

    assert_eq!(pushed_a.metadata.session_id, pushed_b.metadata.session_id);
    assert_ne!(pushed_a.stable_id, pushed_b.stable_id);
}

#[tokio::test]
async fn closing_a_pushed_track_completes_without_error() {
    let fixture = build_fixture().await;
    let track = MockMediaStreamTrack::new("to-close", TrackKind::Video);
    let pushed = fixture.client.push_track(track).await.unwrap();

    fixture.client.close_tracks(vec![pushed.transceiver()], false).await.unwrap();
}

#[tokio::test]
async fn pulling_a_remote_track_resolves_once_the_transceiver_surfaces() {
    let fixture = build_fixture().await;
    let client = Arc::new(fixture.client);

    let pull_client = client.clone();
    let pull_handle =
        tokio::spawn(async move { pull_client.pull_track("remote-cam", "remote-session-1", None).await });

    // Give the dispatcher's flush a chance to acquire the session and send
    // the /tracks/new call before the matching track event fires.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let handle = client.session_coordinator().acquire().await.unwrap();
    let mock = handle.session.peer_connection.as_any().downcast_ref::<MockPeerConnection>().unwrap();
    let track = MockMediaStreamTrack::new("remote-track", TrackKind::Video);
    mock.fire_remote_track(track, "0");
    handle.release();

    let pulled = pull_handle.await.unwrap().unwrap();
    assert_eq!(pulled.metadata.track_name, "remote-cam");
    assert_eq!(pulled.metadata.session_id.as_deref(), Some("remote-session-1"));
}

#[tokio::test]
async fn closing_an_empty_list_is_a_no_op() {
    let fixture = build_fixture().await;
    fixture.client.close_tracks(vec![], false).await.unwrap();
}

#[tokio::test]
async fn invalid_base_url_surfaces_as_an_http_error_not_a_panic() {
    let config = partytracks::Config::from_toml_str(r#"sfu_base_url = "http://127.0.0.1:1""#).unwrap();
    let fetcher: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new());
    let factory = Arc::new(MockPeerConnectionFactory);
    let client = PartyTracksClient::new(&config, fetcher, factory);
    let track = MockMediaStreamTrack::new("a", TrackKind::Audio);

    let err = client.push_track(track).await.unwrap_err();
    assert!(matches!(err, PartyTracksError::Http { .. }));
}
