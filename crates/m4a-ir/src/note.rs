//! Note, envelope and sample header records.

/// Envelope state of a sounding channel. Variants are ordered; a channel
/// only ever moves forward through them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnvState {
    #[default]
    Init,
    Attack,
    Decay,
    Sustain,
    Release,
    PseudoEcho,
    Die,
    Dead,
}

/// Attack/decay/sustain/release bytes of an instrument.
///
/// PCM channels use the raw bytes as multiplicative step sizes, tone
/// generator channels mask them to their hardware widths on attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Adsr {
    pub att: u8,
    pub dec: u8,
    pub sus: u8,
    pub rel: u8,
}

impl Default for Adsr {
    fn default() -> Self {
        Self { att: 0xFF, dec: 0, sus: 0xFF, rel: 0 }
    }
}

impl Adsr {
    pub const fn new(att: u8, dec: u8, sus: u8, rel: u8) -> Self {
        Self { att, dec, sus, rel }
    }

    /// Clamp to the register widths of the tone generator channels.
    pub const fn cgb_masked(self) -> Self {
        Self {
            att: self.att & 0x7,
            dec: self.dec & 0x7,
            sus: self.sus & 0xF,
            rel: self.rel & 0x7,
        }
    }
}

/// A note as handed from the sequencer to a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Note {
    /// Remaining length in ticks; 0 holds until an explicit note-off.
    pub length: u8,
    /// Key as written in the track data (used for note-off matching).
    pub midi_key_track_data: u8,
    /// Key after rhythm remapping (used for pitch).
    pub midi_key_pitch: u8,
    pub velocity: u8,
    pub priority: u8,
    pub rhythm_pan: i8,
    pub pseudo_echo_vol: u8,
    pub pseudo_echo_len: u8,
    pub track_idx: u8,
    pub player_idx: u8,
}

/// Decoded PCM sample header.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleInfo {
    /// ROM offset of the 16-byte header; sample data follows it.
    pub sample_pos: usize,
    /// Playback rate at middle C.
    pub mid_c_freq: f32,
    pub loop_pos: u32,
    pub end_pos: u32,
    pub loop_enabled: bool,
    pub gamefreak_compressed: bool,
}

impl SampleInfo {
    /// ROM offset of the first sample byte.
    pub const fn data_pos(&self) -> usize {
        self.sample_pos + crate::SAMPLE_HEADER_SIZE as usize
    }
}
