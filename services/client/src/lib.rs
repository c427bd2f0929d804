//! # Parley Client
//!
//! A realtime duplex voice client. It bridges a local microphone and
//! speaker to a conversational audio service through a websocket relay.
//!
//! The entry point is [`session::Session::init`], which takes its
//! collaborators as trait objects:
//!
//! - [`provision::ProvisioningService`] issues the relay endpoint and a
//!   short-lived session token,
//! - [`transport::RelayConnector`] opens the relay connection,
//! - [`device::CaptureDevice`] and [`device::PlaybackDevice`] are the
//!   audio hardware (see [`native`] with the `native-audio` feature).
//!
//! Transcripts, tool calls and state changes are reported as
//! [`events::SessionEvent`]s.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod provision;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use error::{ProvisionError, SessionError, TransportError};
pub use events::{Role, SessionEvent, ToolCall};
pub use session::{
    Session, SessionConfig, SessionDeps,
    state::{ConnectionState, SpeakingState},
};
