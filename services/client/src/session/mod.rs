//! # Session
//!
//! One realtime conversation over one relay connection.
//!
//! [`Session::init`] provisions credentials, opens the relay and sends
//! `session.init`. From then on a single driver task owns all session
//! state and processes, one at a time:
//!
//! - host commands (`request_response`, `send_text`, ...),
//! - inbound relay frames, handed over by the reader task,
//! - capture activity notices,
//! - heartbeat ticks.
//!
//! Capture and playback run as their own tasks. They share nothing with the
//! driver except the connection state published on a `watch` channel.

pub(crate) mod capture;
mod dispatcher;
pub(crate) mod playback;
pub mod state;

use crate::{
    device::{CaptureDevice, PlaybackDevice},
    error::{SessionError, TransportError},
    events::SessionEvent,
    provision::{Provisioning, ProvisionRequest, ProvisioningService},
    transport::{self, Inbound, RelayConnector},
};
use capture::CaptureController;
use dispatcher::InboundAudio;
use parley_relay_types::ClientEvent;
use playback::{OutputGuard, PlaybackScheduler};
use state::{ConnectionState, SessionStateMachine, SpeakingState};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{Instrument, debug, error, info, instrument, warn};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    /// Hard limit on the relay handshake.
    pub connect_timeout: Duration,
    /// Samples per capture block, at the device's native rate.
    pub capture_block_size: usize,
    /// Frames held by the playback scheduler before the oldest is dropped.
    pub playback_queue_limit: usize,
    /// Text of the synthetic first user turn.
    pub greeting: Option<String>,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            capture_block_size: parley_core::audio_utils::DEFAULT_CAPTURE_BLOCK_SIZE,
            playback_queue_limit: 256,
            greeting: Some("你好".to_string()),
            outbound_capacity: 256,
            inbound_capacity: 256,
        }
    }
}

/// The collaborators a session is built from.
pub struct SessionDeps {
    pub provisioner: Arc<dyn ProvisioningService>,
    pub connector: Arc<dyn RelayConnector>,
    pub capture: Box<dyn CaptureDevice>,
    pub playback: Arc<dyn PlaybackDevice>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Debug)]
enum Command {
    RequestResponse(&'static str),
    SendText(String),
    ToolOutput { call_id: String, output: String },
    Commit,
    Cancel,
}

/// Publishes state changes to the watch channels and the event sink.
struct Publisher {
    state: watch::Sender<ConnectionState>,
    speaking: watch::Sender<SpeakingState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Publisher {
    fn connection(&self, state: ConnectionState) {
        info!(?state, "Connection state changed");
        self.state.send_replace(state);
        let _ = self.events.send(SessionEvent::ConnectionChanged { state });
    }

    fn speaking(&self, state: SpeakingState) {
        debug!(?state, "Speaking state changed");
        self.speaking.send_replace(state);
        let _ = self.events.send(SessionEvent::SpeakingChanged { state });
    }

    fn event(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// A live realtime session. Dropping it tears the session down in the
/// background; call [`Session::disconnect`] to wait for the teardown.
pub struct Session {
    commands: Option<mpsc::Sender<Command>>,
    driver: Option<JoinHandle<()>>,
    state: watch::Receiver<ConnectionState>,
    speaking: watch::Receiver<SpeakingState>,
    provisioning: Provisioning,
}

impl Session {
    /// Provisions, connects and initialises a session.
    ///
    /// Fails with [`SessionError::Provision`] when the provisioning
    /// collaborator refuses, and with `TransportError::Timeout` when the
    /// relay handshake exceeds `config.connect_timeout`.
    #[instrument(name = "session_init", skip_all, fields(mode = %request.mode))]
    pub async fn init(
        config: SessionConfig,
        deps: SessionDeps,
        request: ProvisionRequest,
    ) -> Result<Session, SessionError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (speaking_tx, speaking_rx) = watch::channel(SpeakingState::Idle);
        let publisher = Publisher {
            state: state_tx,
            speaking: speaking_tx,
            events: deps.events,
        };
        let mut machine = SessionStateMachine::new();

        let provisioning = match deps.provisioner.provision(&request).await {
            Ok(provisioning) => provisioning,
            Err(e) => {
                error!(code = e.code(), error = %e, "Provisioning failed");
                machine.on_error();
                publisher.connection(machine.connection());
                return Err(e.into());
            }
        };

        machine.begin_connecting();
        publisher.connection(machine.connection());

        let opened = open(
            &config,
            &provisioning,
            &request,
            deps.connector.as_ref(),
            deps.playback.as_ref(),
            state_rx.clone(),
        )
        .await;
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                error!(code = e.code(), error = %e, "Failed to open relay session");
                machine.on_error();
                publisher.connection(machine.connection());
                return Err(e);
            }
        };

        let (activity_tx, activity_rx) = mpsc::channel(1);
        let driver = Driver {
            machine,
            publisher,
            state_rx: state_rx.clone(),
            outbound: Some(link.outbound),
            writer: Some(link.writer),
            reader: Some(link.reader),
            transport_open: true,
            capture: CaptureController::new(deps.capture),
            playback: PlaybackScheduler::spawn(link.output, config.playback_queue_limit),
            audio: InboundAudio::new(provisioning.audio_config.output_sample_rate),
            heartbeat: None,
            activity_tx,
            input_rate: provisioning.audio_config.input_sample_rate,
            config,
        };

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let span = tracing::info_span!("session", mode = %request.mode);
        let handle = tokio::spawn(
            driver
                .run(commands_rx, link.inbound, activity_rx)
                .instrument(span),
        );

        Ok(Session {
            commands: Some(commands_tx),
            driver: Some(handle),
            state: state_rx,
            speaking: speaking_rx,
            provisioning,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn speaking(&self) -> SpeakingState {
        *self.speaking.borrow()
    }

    /// A receiver following every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn watch_speaking(&self) -> watch::Receiver<SpeakingState> {
        self.speaking.clone()
    }

    pub fn provisioning(&self) -> &Provisioning {
        &self.provisioning
    }

    /// Asks for a response unless one is already in flight.
    pub async fn request_response(&self, reason: &'static str) -> Result<(), SessionError> {
        self.command(Command::RequestResponse(reason)).await
    }

    /// Adds a user text turn and asks for a response.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::SendText(text.into())).await
    }

    /// Returns the result of a tool call and asks for a response.
    pub async fn submit_tool_output(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.command(Command::ToolOutput {
            call_id: call_id.into(),
            output: output.into(),
        })
        .await
    }

    pub async fn commit_audio(&self) -> Result<(), SessionError> {
        self.command(Command::Commit).await
    }

    /// Cancels the response being generated.
    pub async fn cancel_response(&self) -> Result<(), SessionError> {
        self.command(Command::Cancel).await
    }

    async fn command(&self, command: Command) -> Result<(), SessionError> {
        let commands = self.commands.as_ref().ok_or(SessionError::Closed)?;
        commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    /// Tears the session down and waits for it: capture stops, playback
    /// stops and releases the output, the relay gets `session.close` if
    /// it is still open. Idempotent.
    pub async fn disconnect(&mut self) {
        self.commands = None;
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!(error = ?e, "Session driver panicked");
            }
        }
    }
}

struct OpenedLink {
    outbound: mpsc::Sender<ClientEvent>,
    inbound: mpsc::Receiver<Inbound>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    output: OutputGuard,
}

/// Acquires the output device, connects within the handshake timeout and
/// sends `session.init`. The output is released again if anything fails.
async fn open(
    config: &SessionConfig,
    provisioning: &Provisioning,
    request: &ProvisionRequest,
    connector: &dyn RelayConnector,
    playback: &dyn PlaybackDevice,
    state: watch::Receiver<ConnectionState>,
) -> Result<OpenedLink, SessionError> {
    let audio = &provisioning.audio_config;
    for format in [&audio.input_format, &audio.output_format] {
        if !format.eq_ignore_ascii_case("pcm16") {
            return Err(parley_core::AudioError::UnsupportedFormat(format.clone()).into());
        }
    }
    let url = provisioning.relay_endpoint(&request.mode)?;

    let output = OutputGuard::new(
        playback
            .open(audio.output_sample_rate, 1)
            .map_err(SessionError::Device)?,
    );

    let link = tokio::time::timeout(config.connect_timeout, connector.connect(&url))
        .await
        .map_err(|_| TransportError::Timeout(config.connect_timeout))??;
    info!("Relay handshake complete.");

    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
    let writer = transport::spawn_writer(link.sink, outbound_rx, state);
    let reader = transport::spawn_reader(link.stream, inbound_tx);

    if outbound_tx.send(provisioning.session_init()).await.is_err() {
        reader.abort();
        return Err(TransportError::Closed.into());
    }

    Ok(OpenedLink {
        outbound: outbound_tx,
        inbound: inbound_rx,
        writer,
        reader,
        output,
    })
}

/// Owns the session state. Lives on its own task until teardown.
struct Driver {
    machine: SessionStateMachine,
    publisher: Publisher,
    state_rx: watch::Receiver<ConnectionState>,
    outbound: Option<mpsc::Sender<ClientEvent>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    /// False once the relay stream ended.
    transport_open: bool,
    capture: CaptureController,
    playback: PlaybackScheduler,
    audio: InboundAudio,
    heartbeat: Option<Interval>,
    activity_tx: mpsc::Sender<()>,
    input_rate: u32,
    config: SessionConfig,
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
        mut activity: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(item) = inbound.recv() => self.dispatch(item).await,
                Some(()) = activity.recv() => self.on_capture_activity(),
                _ = tick(&mut self.heartbeat) => {
                    self.send_control(ClientEvent::Ping).await;
                }
            }
        }
        self.teardown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "Session command");
        match command {
            Command::RequestResponse(reason) => self.request_response(reason).await,
            Command::SendText(text) => {
                if self.send_control(ClientEvent::user_text(text)).await {
                    self.request_response("text_input").await;
                }
            }
            Command::ToolOutput { call_id, output } => {
                if self
                    .send_control(ClientEvent::tool_output(call_id, output))
                    .await
                {
                    self.request_response("tool_output").await;
                }
            }
            Command::Commit => {
                self.send_control(ClientEvent::InputAudioBufferCommit).await;
            }
            Command::Cancel => {
                if self.send_control(ClientEvent::ResponseCancel).await {
                    self.machine.clear_response();
                }
            }
        }
    }

    /// Sends a control message if the connection is live. Returns whether
    /// it was queued.
    async fn send_control(&mut self, event: ClientEvent) -> bool {
        if !self.machine.can_send_control() {
            warn!(kind = event.kind(), state = ?self.machine.connection(), "Not sending control message on a closed session.");
            return false;
        }
        self.send(event).await
    }

    async fn send(&mut self, event: ClientEvent) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        if outbound.send(event).await.is_err() {
            warn!("Relay writer is gone.");
            return false;
        }
        true
    }

    async fn request_response(&mut self, reason: &'static str) {
        if self.machine.request_response(reason) {
            debug!(reason, "Requesting response");
            if !self.send(ClientEvent::ResponseCreate).await {
                self.machine.clear_response();
            }
        }
    }

    fn set_speaking(&mut self, next: SpeakingState) {
        if let Some(state) = self.machine.set_speaking(next) {
            self.publisher.speaking(state);
        }
    }

    fn silence(&mut self) {
        if let Some(state) = self.machine.silence() {
            self.publisher.speaking(state);
        }
    }

    fn on_capture_activity(&mut self) {
        if self.machine.speaking() == SpeakingState::Idle {
            self.set_speaking(SpeakingState::UserSpeaking);
        }
    }

    async fn on_connected(&mut self) {
        if !self.machine.on_connected() {
            debug!("Ignoring duplicate connected notice.");
            return;
        }
        self.publisher.connection(ConnectionState::Connected);

        if let Some(outbound) = self.outbound.clone() {
            if let Err(e) = self.capture.start(
                self.config.capture_block_size,
                self.input_rate,
                self.state_rx.clone(),
                outbound,
                self.activity_tx.clone(),
            ) {
                error!(error = %e, "Failed to start capture; continuing without microphone.");
            }
        }

        if let Some(greeting) = self.config.greeting.clone() {
            if self.send_control(ClientEvent::user_text(greeting)).await {
                self.request_response("greeting").await;
            }
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    /// The relay reported that the upstream session ended.
    async fn on_session_closed(&mut self) {
        if self.machine.on_closed() {
            self.publisher.connection(ConnectionState::Disconnected);
        }
        self.silence();
        self.heartbeat = None;
        self.capture.stop().await;
    }

    /// An `error` envelope or a socket failure ended the connection.
    async fn on_error(&mut self, message: String) {
        if self.machine.on_error() {
            self.publisher.connection(ConnectionState::Error);
        }
        self.silence();
        self.heartbeat = None;
        self.capture.stop().await;
        self.publisher.event(SessionEvent::ProtocolError { message });
    }

    async fn teardown(mut self) {
        info!("Tearing down session.");
        if self.machine.on_disconnect() {
            self.publisher.connection(ConnectionState::Disconnected);
        }
        self.silence();
        self.heartbeat = None;
        self.capture.stop().await;

        if self.transport_open {
            self.send(ClientEvent::SessionClose).await;
        }
        self.playback.stop().await;

        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                warn!("Relay writer did not drain in time; aborting.");
                abort.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.audio.reset();
        info!("Session closed.");
    }
}
