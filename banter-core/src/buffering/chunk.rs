//! Typed audio buffers flowing through the capture and playback paths.

/// One fixed-length block of mono capture samples, ready for encoding.
///
/// Created per capture tick on the worker thread and consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (the session wire rate, normally 24000).
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Audio decoded from one received frame. Owned by the playback queue until
/// it is handed to the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// Mono f32 samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Re-chunks an arbitrary stream of samples into blocks of exactly
/// `block_size` samples. Leftover samples wait for the next push.
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl BlockAssembler {
    /// `block_size` of zero is bumped to one.
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Samples buffered but not yet emitted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append samples and return every block that is now complete, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioBlock> {
        let mut blocks = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                blocks.push(AudioBlock::new(full, self.sample_rate));
            }
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nothing_until_block_fills() {
        let mut asm = BlockAssembler::new(4, 24_000);
        assert!(asm.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(asm.pending(), 3);
        let blocks = asm.push(&[0.4]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn splits_large_input_preserving_order() {
        let mut asm = BlockAssembler::new(3, 24_000);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let blocks = asm.push(&input);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].samples, vec![0.0, 1.0, 2.0]);
        assert_eq!(blocks[2].samples, vec![6.0, 7.0, 8.0]);
        assert_eq!(asm.pending(), 1);
        assert!(blocks.iter().all(|b| b.len() == 3 && b.sample_rate == 24_000));
    }

    #[test]
    fn supports_both_deployed_block_sizes() {
        for size in [1024usize, 16_384] {
            let mut asm = BlockAssembler::new(size, 24_000);
            let blocks = asm.push(&vec![0.0; size * 2 + 7]);
            assert_eq!(blocks.len(), 2);
            assert_eq!(asm.pending(), 7);
        }
    }

    #[test]
    fn zero_block_size_is_bumped_to_one() {
        let mut asm = BlockAssembler::new(0, 24_000);
        assert_eq!(asm.push(&[0.5, 0.25]).len(), 2);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn block_duration_matches_rate() {
        let block = AudioBlock::new(vec![0.0; 24_000], 24_000);
        assert!((block.duration_secs() - 1.0).abs() < 1e-9);
    }
}
