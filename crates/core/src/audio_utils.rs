use crate::error::{AudioError, AudioResult};
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

// Sample rates fixed by the relay's audio contract.
pub const PROTOCOL_INPUT_SAMPLE_RATE: u32 = 16000;
pub const PROTOCOL_OUTPUT_SAMPLE_RATE: u32 = 24000;
pub const DEFAULT_CAPTURE_BLOCK_SIZE: usize = 4096;

/// An owned buffer of little-endian PCM16 samples.
///
/// The buffer always holds whole samples; construction rejects odd lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Wraps a mono little-endian PCM16 buffer.
    pub fn from_pcm16_le(pcm: Vec<u8>, sample_rate: u32) -> AudioResult<Self> {
        if pcm.len() % 2 != 0 {
            return Err(AudioError::OddLength(pcm.len()));
        }
        Ok(Self {
            pcm,
            sample_rate,
            channels: 1,
        })
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Converts f32 samples to i16, clamping to [-1, 1] first.
///
/// Negative values scale by 32768 and positive values by 32767, so both ends
/// of the range map onto the full signed 16-bit range.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Serializes i16 samples as little-endian bytes.
pub fn encode_pcm16_le(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
}

/// Interprets little-endian bytes as i16 samples. Odd-length input is rejected.
pub fn decode_pcm16_le(bytes: &[u8]) -> AudioResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Float32 -> PCM16 little-endian bytes.
pub fn encode_f32_to_pcm16_le(pcm32: &[f32]) -> Vec<u8> {
    encode_pcm16_le(&convert_f32_to_i16(pcm32))
}

/// Encodes a slice of f32 samples into a base64 string (converting to i16 PCM first).
pub fn encode_f32_to_base64_i16(pcm32: &[f32]) -> String {
    encode_base64(&encode_f32_to_pcm16_le(pcm32))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes the base64 wire representation back to raw bytes.
///
/// No sample alignment is checked here: relay chunks may split a sample and
/// are stitched together by the `FragmentReassembler`.
pub fn decode_base64(fragment: &str) -> AudioResult<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(fragment)?)
}

/// Creates a linear-interpolation resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> AudioResult<FastFixedIn<f32>> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Linear, // speech-grade, blends the two nearest source samples
        chunk_size,
        1, // mono
    )
    .map_err(|e| AudioError::Resampler(e.to_string()))
}

/// Resamples a continuous mono stream delivered in blocks of any size.
///
/// Samples that do not fill a whole resampler chunk are carried into the next
/// call. When both rates are equal the stream passes through untouched.
pub enum StreamResampler {
    Passthrough,
    Linear {
        inner: FastFixedIn<f32>,
        pending: Vec<f32>,
    },
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> AudioResult<Self> {
        if in_rate == 0 || out_rate == 0 || chunk_size == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot resample {in_rate} Hz -> {out_rate} Hz in chunks of {chunk_size}"
            )));
        }
        if in_rate == out_rate {
            return Ok(StreamResampler::Passthrough);
        }
        Ok(StreamResampler::Linear {
            inner: create_resampler(in_rate as f64, out_rate as f64, chunk_size)?,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, StreamResampler::Passthrough)
    }

    pub fn process(&mut self, input: &[f32]) -> AudioResult<Vec<f32>> {
        match self {
            StreamResampler::Passthrough => Ok(input.to_vec()),
            StreamResampler::Linear { inner, pending } => {
                pending.extend_from_slice(input);
                let mut resampled = Vec::new();
                loop {
                    let needed = inner.input_frames_next();
                    if pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = pending.drain(..needed).collect();
                    let out = inner
                        .process(&[chunk], None)
                        .map_err(|e| AudioError::Resampler(e.to_string()))?;
                    resampled.extend_from_slice(&out[0]);
                }
                Ok(resampled)
            }
        }
    }
}
