//! # Parley Core
//!
//! Audio plumbing shared by the realtime client: PCM16 conversion and the
//! base64 wire form, streaming resampling, chunk reassembly, byte-order
//! salvage and the WAV container handed to playback devices.
//!
//! Nothing in this crate touches the network or an audio device; every
//! function here is deterministic and unit tested in place.

pub mod audio_utils;
pub mod endianness;
mod error;
pub mod reassembler;
pub mod wav;

pub use audio_utils::AudioFrame;
pub use error::{AudioError, AudioResult};
