//! Relay Envelope Types
//!
//! Every message exchanged with the voice relay is a JSON object carrying a
//! `type` tag. This crate models both directions:
//!
//! - `client`: envelopes this client sends (`session.init`, audio appends, control messages).
//! - `server`: envelopes the relay forwards to us (speech boundaries, audio deltas, transcripts).

pub mod client;
pub mod server;

pub use client::{ClientEvent, ConversationItem, ItemContent, ItemRole};
pub use server::ServerEvent;
