//! Mock collaborators shared by the session tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parley_client::{
    ConnectionState, Session, SessionConfig, SessionDeps, SessionEvent, TransportError,
    device::{CaptureDevice, PlaybackDevice, PlaybackOutput},
    error::ProvisionError,
    provision::{ProvisionRequest, Provisioning, ProvisioningService},
    transport::{RelayConnector, RelayFrame, RelayLink},
};
use parley_core::wav::decode_wav;
use reqwest::Url;
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

mockall::mock! {
    pub Provisioner {}

    #[async_trait]
    impl ProvisioningService for Provisioner {
        async fn provision(&self, request: &ProvisionRequest) -> Result<Provisioning, ProvisionError>;
    }
}

pub fn provisioning() -> Provisioning {
    serde_json::from_value(json!({
        "relay_url": "wss://relay.test/functions/v1/realtime-relay",
        "token": "tok-123",
        "user_id": "user-1",
        "instructions": "be kind",
        "tools": [{ "type": "function", "name": "navigate" }]
    }))
    .unwrap()
}

pub fn provisioner_ok() -> MockProvisioner {
    let mut provisioner = MockProvisioner::new();
    provisioner
        .expect_provision()
        .returning(|_| Ok(provisioning()));
    provisioner
}

/// The relay's side of a mock connection.
pub struct RelayServer {
    pub from_client: fmpsc::UnboundedReceiver<RelayFrame>,
    pub to_client: fmpsc::UnboundedSender<Result<RelayFrame, TransportError>>,
}

impl RelayServer {
    pub async fn send(&mut self, event: Value) {
        self.to_client
            .send(Ok(RelayFrame::Text(event.to_string())))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.to_client
            .send(Ok(RelayFrame::Text(text.to_string())))
            .await
            .unwrap();
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.to_client
            .send(Ok(RelayFrame::Binary(bytes)))
            .await
            .unwrap();
    }

    /// Next frame from the client, as JSON. Close frames read as `{"type":"<close>"}`.
    pub async fn next(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for a client frame")?;
        Some(match frame {
            RelayFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            RelayFrame::Binary(_) => json!({ "type": "<binary>" }),
            RelayFrame::Close => json!({ "type": "<close>" }),
        })
    }

    /// Next frame that is not an audio append.
    pub async fn next_control(&mut self) -> Option<Value> {
        loop {
            let frame = self.next().await?;
            if frame["type"] != "input_audio_buffer.append" {
                return Some(frame);
            }
        }
    }

    /// Every remaining frame, until the client drops its sink.
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next().await {
            frames.push(frame);
        }
        frames
    }
}

pub struct MockConnector {
    link: Mutex<Option<RelayLink>>,
    pub urls: Mutex<Vec<Url>>,
}

#[async_trait]
impl RelayConnector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<RelayLink, TransportError> {
        self.urls.lock().unwrap().push(url.clone());
        self.link.lock().unwrap().take().ok_or(TransportError::Closed)
    }
}

pub fn relay() -> (MockConnector, RelayServer) {
    let (client_tx, from_client) = fmpsc::unbounded::<RelayFrame>();
    let (to_client, client_rx) = fmpsc::unbounded::<Result<RelayFrame, TransportError>>();
    let link = RelayLink {
        sink: Box::pin(client_tx.sink_map_err(|_| TransportError::Closed)),
        stream: Box::pin(client_rx),
    };
    (
        MockConnector {
            link: Mutex::new(Some(link)),
            urls: Mutex::new(Vec::new()),
        },
        RelayServer {
            from_client,
            to_client,
        },
    )
}

/// A connector whose handshake never completes.
pub struct PendingConnector;

#[async_trait]
impl RelayConnector for PendingConnector {
    async fn connect(&self, _url: &Url) -> Result<RelayLink, TransportError> {
        std::future::pending().await
    }
}

#[derive(Clone, Default)]
pub struct CaptureProbe {
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl CaptureProbe {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Emits a block of low-level tone every `period` until stopped.
pub struct ToneCapture {
    pub probe: CaptureProbe,
    pub period: Duration,
    task: Option<JoinHandle<()>>,
}

impl ToneCapture {
    pub fn new(probe: CaptureProbe, period: Duration) -> Self {
        Self {
            probe,
            period,
            task: None,
        }
    }
}

impl CaptureDevice for ToneCapture {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn start(&mut self, block_size: usize) -> anyhow::Result<mpsc::Receiver<Vec<f32>>> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let block: Vec<f32> = (0..block_size).map(|i| 0.1 * (i as f32 / 8.0).sin()).collect();
            loop {
                if tx.send(block.clone()).await.is_err() {
                    return;
                }
                tokio::time::sleep(period).await;
            }
        }));
        Ok(rx)
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A microphone that never produces audio.
pub struct SilentCapture {
    pub probe: CaptureProbe,
    sender: Option<mpsc::Sender<Vec<f32>>>,
}

impl SilentCapture {
    pub fn new(probe: CaptureProbe) -> Self {
        Self {
            probe,
            sender: None,
        }
    }
}

impl CaptureDevice for SilentCapture {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn start(&mut self, _block_size: usize) -> anyhow::Result<mpsc::Receiver<Vec<f32>>> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        self.sender = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.sender = None;
    }
}

#[derive(Debug, Default)]
pub struct PlaybackRecord {
    pub opens: usize,
    pub clips: Vec<Vec<i16>>,
    pub releases: usize,
}

/// Records every clip; clips finish as soon as they are submitted.
#[derive(Clone, Default)]
pub struct RecordingPlayback {
    pub record: Arc<Mutex<PlaybackRecord>>,
}

impl RecordingPlayback {
    pub fn releases(&self) -> usize {
        self.record.lock().unwrap().releases
    }

    pub fn clips(&self) -> Vec<Vec<i16>> {
        self.record.lock().unwrap().clips.clone()
    }

    /// Waits until at least `count` clips were submitted.
    pub async fn wait_for_clips(&self, count: usize) -> Vec<Vec<i16>> {
        tokio::time::timeout(WAIT, async {
            loop {
                let clips = self.clips();
                if clips.len() >= count {
                    return clips;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for playback")
    }
}

struct RecordingOutput {
    record: Arc<Mutex<PlaybackRecord>>,
}

impl PlaybackDevice for RecordingPlayback {
    fn open(&self, _sample_rate: u32, _channels: u16) -> anyhow::Result<Box<dyn PlaybackOutput>> {
        self.record.lock().unwrap().opens += 1;
        Ok(Box::new(RecordingOutput {
            record: self.record.clone(),
        }))
    }
}

impl PlaybackOutput for RecordingOutput {
    fn submit(&mut self, wav: Vec<u8>) -> anyhow::Result<oneshot::Receiver<()>> {
        let clip = decode_wav(&wav)?;
        self.record.lock().unwrap().clips.push(clip.samples);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Ok(rx)
    }

    fn release(&mut self) {
        self.record.lock().unwrap().releases += 1;
    }
}

pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        greeting: None,
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub session: Session,
    pub server: RelayServer,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub playback: RecordingPlayback,
}

impl Harness {
    pub async fn start(config: SessionConfig, capture: Box<dyn CaptureDevice>) -> Harness {
        let (connector, server) = relay();
        let playback = RecordingPlayback::default();
        let (events_tx, events) = mpsc::unbounded_channel();
        let deps = SessionDeps {
            provisioner: Arc::new(provisioner_ok()),
            connector: Arc::new(connector),
            capture,
            playback: Arc::new(playback.clone()),
            events: events_tx,
        };
        let session = Session::init(config, deps, ProvisionRequest::new("emotion"))
            .await
            .expect("session should start");
        let mut harness = Harness {
            session,
            server,
            events,
            playback,
        };
        let init = harness.server.next().await.unwrap();
        assert_eq!(init["type"], "session.init");
        harness
    }

    /// Announces the upstream connection and waits until the session is live.
    pub async fn connect(&mut self) {
        self.server.send(json!({ "type": "session.connected" })).await;
        self.wait_state(ConnectionState::Connected).await;
    }

    pub async fn wait_state(&mut self, wanted: ConnectionState) {
        let mut state = self.session.watch_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == wanted))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    /// Returns the first event matching `pred`, collecting the ones skipped.
    pub async fn wait_event<F>(&mut self, pred: F) -> (SessionEvent, Vec<SessionEvent>)
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let mut skipped = Vec::new();
        loop {
            let event = tokio::time::timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event channel closed");
            if pred(&event) {
                return (event, skipped);
            }
            skipped.push(event);
        }
    }
}
