//! Core types for the m4a (MP2K) engine.
//!
//! This crate defines the value types shared by the sequencer, the
//! synthesis channels, the mixer and the host-side controller: engine
//! constants, sound-mode configuration records, notes and envelopes,
//! the visualizer snapshot and the cartridge byte source.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
mod frame;
mod note;
mod rom;
mod sound_mode;
mod visualizer;
mod voice_flags;

pub use constants::*;
pub use frame::StereoSample;
pub use note::{Adsr, EnvState, Note, SampleInfo};
pub use rom::{Rom, RomError};
pub use sound_mode::{
    AgbplaySoundMode, CgbPolyphony, Mp2kSoundMode, ParseModeError, PlayerInfo, ResamplerType,
    ReverbType, SongInfo, SongTableInfo,
};
pub use visualizer::{
    meter_level, ActiveNotes, PlayerVisualizerState, TrackVisualizerState, VisualizerState,
};
pub use voice_flags::VoiceFlags;
