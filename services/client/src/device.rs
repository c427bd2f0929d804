//! Boundaries to the local audio hardware.
//!
//! Audio APIs are callback driven. Implementations adapt those callbacks
//! into channel sends so the session only ever deals with channels.

use tokio::sync::{mpsc, oneshot};

/// A microphone delivering mono f32 blocks at its native rate.
pub trait CaptureDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Starts capturing and returns the block channel. Blocks hold
    /// `block_size` samples; the channel closes when capture stops.
    fn start(&mut self, block_size: usize) -> anyhow::Result<mpsc::Receiver<Vec<f32>>>;

    /// Stops the callback. No block is delivered after this returns.
    fn stop(&mut self);
}

/// A speaker that can be opened for one session.
pub trait PlaybackDevice: Send + Sync {
    fn open(&self, sample_rate: u32, channels: u16) -> anyhow::Result<Box<dyn PlaybackOutput>>;
}

/// An acquired output stream.
pub trait PlaybackOutput: Send {
    /// Queues a WAV clip. The receiver resolves when the clip finished
    /// playing; a dropped sender counts as finished.
    fn submit(&mut self, wav: Vec<u8>) -> anyhow::Result<oneshot::Receiver<()>>;

    /// Releases the device. Called exactly once.
    fn release(&mut self);
}
