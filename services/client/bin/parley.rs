//! Main entrypoint for the Parley voice client.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Initializing logging.
//! 3. Running a session against the default (or chosen) audio devices.
//! 4. Reconnecting after unexpected drops, and shutting down on Ctrl+C.

use anyhow::{Context, bail};
use clap::Parser;
use parley_client::{
    ConnectionState, Role, Session, SessionDeps, SessionEvent,
    config::Config,
    native::{CpalCapture, CpalPlayback, list_devices},
    provision::{HttpProvisioner, ProvisionRequest},
    reconnect::ReconnectPolicy,
    transport::WsConnector,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Realtime voice conversations from the terminal")]
struct Args {
    /// Voice mode sent to the provisioning service (defaults to VOICE_MODE).
    #[arg(long)]
    mode: Option<String>,
    /// Name of the input device to capture from.
    #[arg(long)]
    input_device: Option<String>,
    /// Name of the output device to play through.
    #[arg(long)]
    output_device: Option<String>,
    /// Skip the synthetic greeting turn.
    #[arg(long)]
    no_greeting: bool,
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

/// Prints transcripts and tool calls as they arrive.
async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Transcript {
                role,
                text,
                is_final: true,
            } => {
                let who = match role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("[{who}] {text}");
            }
            SessionEvent::ToolCall(call) => {
                println!("[tool] {}({})", call.name, call.arguments);
            }
            SessionEvent::ProtocolError { message } => {
                eprintln!("[error] {message}");
            }
            SessionEvent::ConnectionChanged { state } => info!(?state, "Connection"),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    if args.list_devices {
        let (inputs, outputs) = list_devices()?;
        println!("Input devices:");
        inputs.iter().for_each(|name| println!("  {name}"));
        println!("Output devices:");
        outputs.iter().for_each(|name| println!("  {name}"));
        return Ok(());
    }

    // --- 3. Build Collaborators ---
    let mode = args.mode.clone().unwrap_or_else(|| config.voice_mode.clone());
    let mut session_config = config.session_config();
    if args.no_greeting {
        session_config.greeting = None;
    }
    let provisioner = Arc::new(HttpProvisioner::new(
        config.provision_url.clone(),
        config.provision_access_token.clone(),
    ));
    let connector = Arc::new(WsConnector);
    let playback = Arc::new(CpalPlayback::new(args.output_device.as_deref()));
    let policy = ReconnectPolicy::new(config.reconnect_attempts);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx));
    info!(%mode, "Configuration loaded. Starting voice session...");

    // --- 4. Run Sessions ---
    let mut attempt = 0;
    loop {
        let capture = CpalCapture::new(args.input_device.as_deref())
            .context("Failed to open input device")?;
        let deps = SessionDeps {
            provisioner: provisioner.clone(),
            connector: connector.clone(),
            capture: Box::new(capture),
            playback: playback.clone(),
            events: events_tx.clone(),
        };

        match Session::init(session_config.clone(), deps, ProvisionRequest::new(&mode)).await {
            Ok(mut session) => {
                attempt = 0;
                println!("Connected. Speak any time; press Ctrl+C to hang up.");
                let mut state = session.watch_state();
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal. Disconnecting...");
                        session.disconnect().await;
                        break;
                    }
                    ended = state.wait_for(|s| s.is_terminal()) => {
                        let ended = ended.map(|s| *s).unwrap_or(ConnectionState::Error);
                        warn!(state = ?ended, "Session ended unexpectedly.");
                        session.disconnect().await;
                    }
                }
            }
            Err(e) => {
                error!(code = e.code(), error = %e, "Failed to start session.");
                if !ReconnectPolicy::should_retry(&e) {
                    return Err(e).context("Session cannot be started");
                }
            }
        }

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            bail!("Giving up after {} reconnect attempts", policy.max_attempts);
        };
        info!(attempt, ?delay, "Reconnecting...");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(events_tx);
    let _ = printer.await;
    info!("Voice client has shut down.");
    Ok(())
}
