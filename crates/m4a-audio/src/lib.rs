//! Real-time audio hand-off and output backends for m4aplay.

mod cpal_backend;
mod ring_buffer;
mod traits;

pub use cpal_backend::CpalOutput;
pub use ring_buffer::{sample_ring, RingCloser, RingConsumer, RingProducer};
pub use traits::{AudioError, AudioOutput};
