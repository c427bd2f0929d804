use thiserror::Error;

/// Errors raised while encoding, decoding or resampling audio.
#[derive(Debug, Error)]
pub enum AudioError {
    /// A PCM16 buffer must hold whole 2-byte samples.
    #[error("PCM16 buffer has odd length {0}")]
    OddLength(usize),
    #[error("invalid base64 audio: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid audio container: {0}")]
    Container(#[from] hound::Error),
    #[error("resampler error: {0}")]
    Resampler(String),
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
