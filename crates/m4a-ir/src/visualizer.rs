//! Read-only playback snapshot consumed by front ends.

use alloc::vec::Vec;

use crate::VoiceFlags;

/// Set of currently held keys, one bit per MIDI key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveNotes(u128);

impl ActiveNotes {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, key: u8) {
        self.0 |= 1u128 << (key % 128);
    }

    pub fn contains(&self, key: u8) -> bool {
        self.0 & (1u128 << (key % 128)) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..128).filter(move |k| self.contains(*k))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackVisualizerState {
    pub track_ptr: usize,
    pub env_l_float: f32,
    pub env_r_float: f32,
    pub is_calling: bool,
    pub is_muted: bool,
    pub vol: u8,
    pub modulation: u8,
    pub prog: u8,
    pub pan: i8,
    pub pitch: i16,
    pub env_l: u8,
    pub env_r: u8,
    pub delay: u16,
    pub active_notes: ActiveNotes,
    pub active_voice_types: VoiceFlags,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerVisualizerState {
    pub tracks: Vec<TrackVisualizerState>,
    pub tracks_used: usize,
    pub bpm: u16,
    pub bpm_factor: f32,
    /// Seconds since the song started.
    pub time: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisualizerState {
    pub players: Vec<PlayerVisualizerState>,
    pub master_vol_left: f32,
    pub master_vol_right: f32,
    /// Number of live PCM channels.
    pub active_channels: usize,
    pub primary_player: usize,
}

impl VisualizerState {
    /// State of the player that owns the current song.
    pub fn primary(&self) -> Option<&PlayerVisualizerState> {
        self.players.get(self.primary_player)
    }
}

/// Map a loudness value to the 0..=255 meter scale.
pub fn meter_level(vol: f32) -> u8 {
    (vol * 768.0).clamp(0.0, 255.0) as u8
}
