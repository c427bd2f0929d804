//! Stitches PCM16 byte streams that arrive split at arbitrary byte offsets.

/// Carries at most one trailing byte between inbound chunks so that every
/// buffer handed downstream holds whole 16-bit samples.
#[derive(Debug, Default, Clone)]
pub struct FragmentReassembler {
    remainder: Option<u8>,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `chunk` onto the pending byte and returns the longest
    /// even-length prefix. A trailing odd byte is held for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut joined = Vec::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.remainder.take() {
            joined.push(byte);
        }
        joined.extend_from_slice(chunk);
        if joined.len() % 2 != 0 {
            self.remainder = joined.pop();
        }
        joined
    }

    pub fn remainder_len(&self) -> usize {
        usize::from(self.remainder.is_some())
    }

    /// Hands back the pending byte, leaving the reassembler empty.
    pub fn take_remainder(&mut self) -> Option<u8> {
        self.remainder.take()
    }

    pub fn reset(&mut self) {
        self.remainder = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn odd_split_loses_nothing() {
        let mut reassembler = FragmentReassembler::new();
        let mut out = Vec::new();

        out.extend(reassembler.push(&[0x01]));
        assert!(out.is_empty());
        assert_eq!(reassembler.remainder_len(), 1);

        out.extend(reassembler.push(&[0x02, 0x03]));
        assert_eq!(out, vec![0x01, 0x02]);
        assert_eq!(reassembler.remainder_len(), 1);

        out.extend(reassembler.push(&[0x04, 0x05]));
        assert_eq!(out, vec![0x01, 0x02, 0x03, 0x04]);

        out.extend(reassembler.take_remainder());
        assert_eq!(out, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(reassembler.remainder_len(), 0);
    }

    #[test]
    fn even_chunks_pass_straight_through() {
        let mut reassembler = FragmentReassembler::new();
        assert_eq!(reassembler.push(&[1, 2, 3, 4]), vec![1, 2, 3, 4]);
        assert_eq!(reassembler.remainder_len(), 0);
        assert!(reassembler.push(&[]).is_empty());
    }

    #[test]
    fn reset_clears_pending_byte() {
        let mut reassembler = FragmentReassembler::new();
        reassembler.push(&[9]);
        reassembler.reset();
        assert_eq!(reassembler.push(&[1, 2]), vec![1, 2]);
    }

    #[test]
    fn random_chunking_reproduces_stream() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let samples = rng.random_range(0..2000);
            let stream: Vec<u8> = (0..samples * 2).map(|_| rng.random()).collect();

            let mut reassembler = FragmentReassembler::new();
            let mut rebuilt = Vec::with_capacity(stream.len());
            let mut offset = 0;
            while offset < stream.len() {
                let size = rng.random_range(1..=37).min(stream.len() - offset);
                let out = reassembler.push(&stream[offset..offset + size]);
                assert_eq!(out.len() % 2, 0);
                assert!(reassembler.remainder_len() <= 1);
                rebuilt.extend(out);
                offset += size;
            }
            // a valid PCM16 stream always ends on a sample boundary
            assert_eq!(reassembler.remainder_len(), 0);
            assert_eq!(rebuilt, stream);
        }
    }
}
