//! Playback engine for MP2K (m4a) music.
//!
//! The [`Context`] reads song data straight from a cartridge image, runs
//! the sequencer once per render tick and mixes the resulting sample and
//! tone generator channels into one stereo buffer of
//! `sample_rate / 240` frames.

extern crate alloc;

pub mod bank;
pub mod channel;
mod context;
pub mod loudness;
pub mod mixer;
pub mod player;
pub mod resampler;
pub mod reverb;
pub mod sequencer;
pub mod track;

pub use bank::{BankError, Instrument};
pub use channel::{Channel, ChannelId, ChannelKind, ChannelPool, TrackId};
pub use context::Context;
pub use loudness::Loudness;
pub use mixer::{Mixer, MixingArgs};
pub use player::Player;
pub use resampler::Resampler;
pub use reverb::Reverb;
pub use sequencer::Sequencer;
pub use track::{Modt, Track};
