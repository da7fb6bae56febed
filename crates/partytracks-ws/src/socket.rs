//! An auto-reconnecting WebSocket client.
//!
//! Grounded on `forwarder::uplink::UplinkSession` (connect-with-backoff, a
//! pre-open send queue, min-uptime-gated retry reset) and on ethers-rs's
//! `RequestManager::reconnect` loop (the "don't let a terminal retry budget
//! wedge the reconnect command forever" shape). Transport is
//! `tokio-tungstenite`; everything above the wire is transport-neutral so
//! `partytracks-test-utils` can drive the same state machine over an in
//! process duplex stream.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

pub type BoxUrlFuture = Pin<Box<dyn Future<Output = String> + Send>>;

/// How the socket's URL is produced on every (re)connect attempt.
///
/// Many SFU deployments mint a short-lived signaling token per connection
/// attempt, so the URL is not always a constant.
#[derive(Clone)]
pub enum UrlProvider {
    Static(String),
    Sync(Arc<dyn Fn() -> String + Send + Sync>),
    Async(Arc<dyn Fn() -> BoxUrlFuture + Send + Sync>),
}

impl UrlProvider {
    async fn resolve(&self) -> String {
        match self {
            UrlProvider::Static(url) => url.clone(),
            UrlProvider::Sync(f) => f(),
            UrlProvider::Async(f) => f().await,
        }
    }
}

impl std::fmt::Debug for UrlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlProvider::Static(url) => f.debug_tuple("Static").field(url).finish(),
            UrlProvider::Sync(_) => f.write_str("Sync(..)"),
            UrlProvider::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// One outbound or inbound frame. `partytracks`'s own signaling payloads are
/// JSON text; binary is exposed for completeness and for callers layering a
/// different wire format over the same reconnect machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    fn byte_len(&self) -> u64 {
        match self {
            Frame::Text(t) => t.len() as u64,
            Frame::Binary(b) => b.len() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SocketEvent {
    Open,
    Message(Frame),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Debug)]
pub struct ReconnectingSocketConfig {
    pub url: UrlProvider,
    pub protocols: Vec<String>,
    pub min_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub reconnect_delay_grow_factor: f64,
    /// A connection must stay open this long before a future drop resets the
    /// retry counter back to zero. Without this, a connection that opens and
    /// immediately dies (e.g. an SFU rejecting the session) would retry at
    /// full speed forever instead of backing off.
    pub min_uptime: Duration,
    pub connection_timeout: Duration,
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
    pub max_enqueued_messages: usize,
    /// Start in the idle/closed state rather than connecting immediately.
    pub start_closed: bool,
}

impl Default for ReconnectingSocketConfig {
    fn default() -> Self {
        Self {
            url: UrlProvider::Static(String::new()),
            protocols: Vec::new(),
            min_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(10_000),
            reconnect_delay_grow_factor: 1.3,
            min_uptime: Duration::from_millis(5000),
            connection_timeout: Duration::from_millis(4000),
            max_retries: None,
            max_enqueued_messages: usize::MAX,
            start_closed: false,
        }
    }
}

fn backoff_delay(config: &ReconnectingSocketConfig, attempt: u32) -> Duration {
    let base = config.min_reconnect_delay.as_millis() as f64
        * config.reconnect_delay_grow_factor.powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(config.max_reconnect_delay.as_millis() as f64);
    let jitter_frac = rand::thread_rng().gen_range(0.0..0.2);
    Duration::from_millis((capped * (1.0 + jitter_frac)) as u64)
}

enum Command {
    Send(Frame),
    Close,
    Reconnect,
}

/// Handle to a live reconnect loop running on a background task.
///
/// Cloning shares the same underlying socket; dropping every clone stops the
/// background task via the closed `cmd_tx` channel.
#[derive(Clone)]
pub struct ReconnectingSocket {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<SocketEvent>,
    phase_rx: watch::Receiver<ConnectionPhase>,
    buffered_amount: Arc<AtomicU64>,
    binary_preferred: Arc<AtomicBool>,
}

impl ReconnectingSocket {
    pub fn connect(config: ReconnectingSocketConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Closed);
        let buffered_amount = Arc::new(AtomicU64::new(0));
        let binary_preferred = Arc::new(AtomicBool::new(false));

        let task_events_tx = events_tx.clone();
        let task_buffered_amount = buffered_amount.clone();
        tokio::spawn(run(config, cmd_rx, task_events_tx, phase_tx, task_buffered_amount));

        Self {
            cmd_tx,
            events_tx,
            phase_rx,
            buffered_amount,
            binary_preferred,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events_tx.subscribe()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase_rx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase_rx.clone()
    }

    pub fn buffered_amount(&self) -> u64 {
        self.buffered_amount.load(Ordering::Relaxed)
    }

    /// Mirrors the browser `WebSocket.binaryType` setter: purely descriptive
    /// on this transport (tungstenite frames are already typed), kept so
    /// callers porting browser logic have somewhere to put the preference.
    pub fn set_binary_preferred(&self, binary: bool) {
        self.binary_preferred.store(binary, Ordering::Relaxed);
    }

    pub fn binary_preferred(&self) -> bool {
        self.binary_preferred.load(Ordering::Relaxed)
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Send(Frame::Text(text.into())));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.cmd_tx.send(Command::Send(Frame::Binary(data)));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect);
    }
}

enum LoopOutcome {
    ClosedByUser,
    Disconnected,
}

async fn run(
    config: ReconnectingSocketConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: broadcast::Sender<SocketEvent>,
    phase_tx: watch::Sender<ConnectionPhase>,
    buffered_amount: Arc<AtomicU64>,
) {
    let mut should_run = !config.start_closed;
    let mut retries: u32 = 0;
    let mut queue: VecDeque<Frame> = VecDeque::new();

    loop {
        if !should_run {
            let _ = phase_tx.send(ConnectionPhase::Closed);
            match cmd_rx.recv().await {
                Some(Command::Reconnect) => {
                    // The fix this guards: a previous implementation left
                    // the loop in a terminal state after exhausting
                    // max_retries, so a later `reconnect()` call was a no-op
                    // forever. Resetting both flags here is what makes
                    // `reconnect()` effective again after that happens.
                    should_run = true;
                    retries = 0;
                }
                Some(Command::Close) => {}
                Some(Command::Send(frame)) => enqueue(&mut queue, frame, config.max_enqueued_messages, &buffered_amount),
                None => return,
            }
            continue;
        }

        let _ = phase_tx.send(ConnectionPhase::Connecting);
        let url = config.url.resolve().await;
        let connect_result = tokio::time::timeout(config.connection_timeout, connect(&url, &config.protocols)).await;

        let ws_stream = match connect_result {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(err)) => {
                let _ = events_tx.send(SocketEvent::Error(err.to_string()));
                None
            }
            Err(_) => {
                let _ = events_tx.send(SocketEvent::Error("connection attempt timed out".to_owned()));
                None
            }
        };

        let Some(mut ws_stream) = ws_stream else {
            retries += 1;
            if let Some(max) = config.max_retries {
                if retries > max {
                    let _ = events_tx.send(SocketEvent::Error("max reconnect attempts exhausted".to_owned()));
                    should_run = false;
                    continue;
                }
            }
            let delay = backoff_delay(&config, retries);
            debug!(attempt = retries, ?delay, "retrying websocket connect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close) => should_run = false,
                    Some(Command::Reconnect) => retries = 0,
                    Some(Command::Send(frame)) => enqueue(&mut queue, frame, config.max_enqueued_messages, &buffered_amount),
                    None => return,
                }
            }
            continue;
        };

        let opened_at = Instant::now();
        let _ = phase_tx.send(ConnectionPhase::Open);
        let _ = events_tx.send(SocketEvent::Open);

        while let Some(frame) = queue.pop_front() {
            buffered_amount.fetch_sub(frame.byte_len(), Ordering::Relaxed);
            if send_frame(&mut ws_stream, frame).await.is_err() {
                break;
            }
        }

        let outcome = io_loop(&mut ws_stream, &mut cmd_rx, &events_tx, &mut queue, &config, &buffered_amount).await;

        if opened_at.elapsed() >= config.min_uptime {
            retries = 0;
        }

        match outcome {
            LoopOutcome::ClosedByUser => should_run = false,
            LoopOutcome::Disconnected => {}
        }
    }
}

fn enqueue(queue: &mut VecDeque<Frame>, frame: Frame, max_enqueued: usize, buffered_amount: &AtomicU64) {
    if queue.len() >= max_enqueued {
        warn!("outgoing frame dropped, pre-open queue is full");
        return;
    }
    buffered_amount.fetch_add(frame.byte_len(), Ordering::Relaxed);
    queue.push_back(frame);
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(
    url: &str,
    protocols: &[String],
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if !protocols.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&protocols.join(", ")) {
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn send_frame(ws: &mut WsStream, frame: Frame) -> Result<(), ()> {
    let message = match frame {
        Frame::Text(t) => Message::Text(t.into()),
        Frame::Binary(b) => Message::Binary(b.into()),
    };
    ws.send(message).await.map_err(|_| ())
}

async fn io_loop(
    ws: &mut WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events_tx: &broadcast::Sender<SocketEvent>,
    queue: &mut VecDeque<Frame>,
    config: &ReconnectingSocketConfig,
    buffered_amount: &AtomicU64,
) -> LoopOutcome {
    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events_tx.send(SocketEvent::Message(Frame::Text(text.to_string())));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = events_tx.send(SocketEvent::Message(Frame::Binary(data.to_vec())));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        let _ = events_tx.send(SocketEvent::Closed { code, reason });
                        return LoopOutcome::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = events_tx.send(SocketEvent::Error(err.to_string()));
                        return LoopOutcome::Disconnected;
                    }
                    None => {
                        let _ = events_tx.send(SocketEvent::Closed { code: 1006, reason: "connection lost".to_owned() });
                        return LoopOutcome::Disconnected;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if send_frame(ws, frame.clone()).await.is_err() {
                            enqueue(queue, frame, config.max_enqueued_messages, buffered_amount);
                            return LoopOutcome::Disconnected;
                        }
                    }
                    Some(Command::Close) => {
                        let _ = ws.send(Message::Close(None)).await;
                        return LoopOutcome::ClosedByUser;
                    }
                    Some(Command::Reconnect) => {
                        let _ = ws.send(Message::Close(None)).await;
                        return LoopOutcome::Disconnected;
                    }
                    None => return LoopOutcome::ClosedByUser,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates_at_max() {
        let config = ReconnectingSocketConfig {
            min_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_millis(500),
            reconnect_delay_grow_factor: 2.0,
            ..Default::default()
        };
        // jitter adds up to 20%, so compare against the un-jittered floor.
        let d1 = backoff_delay(&config, 1).as_millis();
        let d2 = backoff_delay(&config, 2).as_millis();
        let d5 = backoff_delay(&config, 5).as_millis();
        assert!(d1 >= 100 && d1 <= 120);
        assert!(d2 >= 200 && d2 <= 240);
        assert!(d5 >= 500 && d5 <= 600);
    }

    #[tokio::test]
    async fn queue_drops_frames_once_full_without_panicking() {
        let mut queue = VecDeque::new();
        let buffered = AtomicU64::new(0);
        enqueue(&mut queue, Frame::Text("a".into()), 1, &buffered);
        enqueue(&mut queue, Frame::Text("b".into()), 1, &buffered);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front(), Some(&Frame::Text("a".into())));
    }

    #[tokio::test]
    async fn reconnect_after_exhausted_retries_restarts_the_loop() {
        // Regression test for the connect-lock-leak class of bug: once
        // `max_retries` is exhausted the loop must still honor a later
        // `Command::Reconnect` rather than wedging in the closed branch
        // forever.
        let config = ReconnectingSocketConfig {
            url: UrlProvider::Static("ws://127.0.0.1:1".to_owned()),
            max_retries: Some(0),
            min_reconnect_delay: Duration::from_millis(1),
            max_reconnect_delay: Duration::from_millis(2),
            connection_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let socket = ReconnectingSocket::connect(config);
        let mut events = socket.subscribe();

        // First attempt fails immediately (nothing listens on port 1) and
        // with max_retries = 0 the loop goes idle.
        let mut saw_error = false;
        for _ in 0..20 {
            if let Ok(SocketEvent::Error(_)) =
                tokio::time::timeout(Duration::from_millis(200), events.recv()).await.unwrap_or(Err(broadcast::error::RecvError::Closed))
            {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "expected the socket to report a connect error");

        // Reconnect must be effective, not a no-op: this would hang forever
        // under the leaked-lock bug since the loop had nothing left to wake
        // it up.
        socket.reconnect();
        let next = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(next.is_ok(), "reconnect() must wake the loop back up");
    }
}
