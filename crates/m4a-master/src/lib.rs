//! Headless controller for m4aplay.
//!
//! Provides a unified API for loading cartridges and profiles, live
//! playback and offline rendering that the CLI builds on.

mod controller;
pub mod export;
pub mod profile;
mod wav;

pub use controller::{Controller, ControllerError};
pub use export::{render_song, render_song_stems, write_rendered, Rendered};
pub use profile::{PlaylistEntry, Profile, ProfileError};
pub use wav::{samples_to_wav, write_wav, write_wav_file};

// Re-export common types so callers don't need the lower crates directly.
pub use m4a_engine::Context;
pub use m4a_formats::{load_rom, CartridgeHeader, FormatError, LoadOptions};
pub use m4a_ir::{
    AgbplaySoundMode, CgbPolyphony, Mp2kSoundMode, PlayerInfo, ResamplerType, ReverbType, Rom,
    SongInfo, SongTableInfo, StereoSample, VisualizerState,
};
