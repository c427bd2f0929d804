//! Best-effort repair of PCM16 streams delivered in the wrong byte order.
//!
//! The relay contract is little-endian, but some upstream responses arrive
//! byte-swapped. Misread samples land near full scale far more often than
//! real speech does, so a window is decoded both ways and the order showing
//! heavy saturation is abandoned when the other one looks markedly calmer.
//!
//! This is a heuristic. [`correct_byte_order`] is pure: it never changes
//! the order a caller assumes, it only reports what it chose.

/// Chunks shorter than this are passed through in the assumed order.
pub const MIN_SAMPLES: usize = 100;
/// Samples inspected per chunk.
pub const WINDOW_SAMPLES: usize = 2000;
/// Magnitudes at or above this count as near clipping.
pub const CLIP_THRESHOLD: i32 = 30000;

const CLIP_FRACTION_LIMIT: f32 = 0.25;
const MEAN_LIMIT: f32 = 0.55;
const MIN_IMPROVEMENT: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn swapped(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    fn read(self, pair: [u8; 2]) -> i16 {
        match self {
            ByteOrder::Little => i16::from_le_bytes(pair),
            ByteOrder::Big => i16::from_be_bytes(pair),
        }
    }
}

/// Amplitude statistics of one interpretation of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderStats {
    /// Mean absolute magnitude, normalized to full scale.
    pub mean_abs: f32,
    /// Share of samples at or above [`CLIP_THRESHOLD`].
    pub clip_fraction: f32,
}

impl OrderStats {
    fn measure(window: &[u8], order: ByteOrder) -> Self {
        let mut total = 0u64;
        let mut clipped = 0usize;
        let mut count = 0usize;
        for pair in window.chunks_exact(2) {
            let magnitude = i32::from(order.read([pair[0], pair[1]])).abs();
            total += magnitude as u64;
            if magnitude >= CLIP_THRESHOLD {
                clipped += 1;
            }
            count += 1;
        }
        if count == 0 {
            return Self {
                mean_abs: 0.0,
                clip_fraction: 0.0,
            };
        }
        Self {
            mean_abs: total as f32 / count as f32 / 32768.0,
            clip_fraction: clipped as f32 / count as f32,
        }
    }
}

/// What the corrector saw and decided for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteOrderReport {
    pub assumed: ByteOrder,
    pub chosen: ByteOrder,
    pub swapped: bool,
    pub assumed_stats: OrderStats,
    pub alternate_stats: OrderStats,
    pub analyzed_samples: usize,
}

/// True when `assumed` looks saturated and `alternate` is at least 30% calmer.
pub fn should_swap(assumed: &OrderStats, alternate: &OrderStats) -> bool {
    let clipping = assumed.clip_fraction > CLIP_FRACTION_LIMIT
        && alternate.clip_fraction <= assumed.clip_fraction * MIN_IMPROVEMENT;
    let loudness =
        assumed.mean_abs > MEAN_LIMIT && alternate.mean_abs <= assumed.mean_abs * MIN_IMPROVEMENT;
    clipping || loudness
}

/// Returns `bytes` rewritten as little-endian PCM16, along with a report
/// whenever the chunk was long enough to analyze.
///
/// `assumed` is the order the stream is currently believed to use. A
/// trailing odd byte, if any, is copied through unchanged.
pub fn correct_byte_order(
    bytes: &[u8],
    assumed: ByteOrder,
) -> (Vec<u8>, Option<ByteOrderReport>) {
    let samples = bytes.len() / 2;
    let report = (samples >= MIN_SAMPLES).then(|| {
        let window = &bytes[..samples.min(WINDOW_SAMPLES) * 2];
        let assumed_stats = OrderStats::measure(window, assumed);
        let alternate_stats = OrderStats::measure(window, assumed.swapped());
        let swapped = should_swap(&assumed_stats, &alternate_stats);
        ByteOrderReport {
            assumed,
            chosen: if swapped { assumed.swapped() } else { assumed },
            swapped,
            assumed_stats,
            alternate_stats,
            analyzed_samples: window.len() / 2,
        }
    });

    let chosen = report.as_ref().map_or(assumed, |r| r.chosen);
    let corrected = match chosen {
        ByteOrder::Little => bytes.to_vec(),
        ByteOrder::Big => {
            let mut out = Vec::with_capacity(bytes.len());
            for pair in bytes.chunks_exact(2) {
                out.extend_from_slice(&[pair[1], pair[0]]);
            }
            out.extend_from_slice(bytes.chunks_exact(2).remainder());
            out
        }
    };
    (corrected, report)
}
