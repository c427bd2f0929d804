//! Minimal RIFF/WAVE container used to hand PCM16 frames to playback devices.

use crate::audio_utils::{decode_pcm16_le, AudioFrame};
use crate::error::{AudioError, AudioResult};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;

/// Size of the canonical PCM WAV header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// A clip read back out of a WAV container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// Wraps a frame in a 44 byte PCM16 WAV header.
pub fn encode_wav(frame: &AudioFrame) -> AudioResult<Vec<u8>> {
    let spec = WavSpec {
        channels: frame.channels(),
        sample_rate: frame.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let samples = decode_pcm16_le(frame.pcm())?;
    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + frame.pcm().len()));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Parses a WAV container holding 16-bit integer PCM.
pub fn decode_wav(bytes: &[u8]) -> AudioResult<DecodedClip> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DecodedClip {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}
