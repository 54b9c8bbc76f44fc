//! Lock-free SPSC ring buffer for captured samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback. The capture worker drains
//! the consumer half and re-chunks into fixed-size blocks via
//! [`chunk::BlockAssembler`].

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the capture worker thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^19 = 524 288 f32 samples ≈ 10.9 s at 48 kHz.
/// Blocks are forwarded as soon as they fill, so this only has to absorb
/// scheduling hiccups on the worker thread.
pub const RING_CAPACITY: usize = 1 << 19;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
